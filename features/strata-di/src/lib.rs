//! Layered dependency injection
//!
//! Components declare how they are built through a [Manifest]. On [Container::load] the container discovers all
//! components and configurations, orders them into layers by their dependencies and builds every layer
//! concurrently before moving on to the next one.

mod bean_graph;
mod builder;
mod configuration;
mod container;
mod dependency_graph;
mod errors;
mod factories;
mod finder;
mod handle;
mod loader;
mod manifest;
mod phases;
mod pool;
mod proxy;
mod qualifier;
mod registry;
mod resolver;
mod settings;
mod types;

pub use bean_graph::{BeanDependency, BeanDescriptor, BeanGraph, BeanId};
pub use builder::ContainerBuilder;
pub use configuration::{
    BeanMethod, Configuration, ConfigurationDescriptor, ConfigurationManifest, ProviderMethod,
};
pub use container::{Container, LoadState, WeakContainer};
pub use dependency_graph::{
    extract, DependencyGraph, DependencyGraphError, DependencyGraphErrors, ServiceSet,
    ServiceSummary,
};
pub use errors::{InitError, InjectError, RegistrationError, RequireError};
pub use factories::{ComponentFactory, DynComponent};
pub use finder::{Catalog, Discovered, TypeFinder};
pub use handle::{ExtraArgs, InjectionHandle};
pub use loader::LoadPlan;
pub use manifest::{Args, Component, Constructor, InjectionPoint, Manifest};
pub use phases::{split, Phase, PhasePlan};
pub use proxy::{Decorators, NoProxy, ProxyFactory};
pub use qualifier::{Qualified, Qualifier, DEFAULT_QUALIFIER};
pub use registry::{DependencyEntry, EntryId, Factory, Registry};
pub use resolver::{
    composite::{All, AtomicAll, WeakAll},
    lazy::{Lazy, LazyOption},
    Resolver,
};
pub use settings::ContainerSettings;
pub use types::{
    Binding, DependencyInfo, DynError, EntryKey, Injectable, Instance, InstanceSet, Scope, TypeInfo,
};
