use std::sync::Arc;

use crate::{
    configuration::Configuration,
    container::{provider_entry, Container, Preregistration},
    errors::InitError,
    finder::{Catalog, TypeFinder},
    handle::InjectionHandle,
    manifest::Component,
    proxy::{NoProxy, ProxyFactory},
    qualifier::Qualifier,
    registry::DependencyEntry,
    settings::ContainerSettings,
    types::{DynError, Injectable, Instance, InstanceSet, Scope},
};

/// Collects everything a [Container] is made of
///
/// Components and configurations added here are discovered through a [Catalog], further [TypeFinder]s can be
/// added. Instances and providers are registered before anything is discovered on every load.
pub struct ContainerBuilder {
    settings: ContainerSettings,
    catalog: Catalog,
    finders: Vec<Box<dyn TypeFinder>>,
    proxy: Box<dyn ProxyFactory>,
    preregistered: Vec<Preregistration>,
}
impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        ContainerBuilder {
            settings: ContainerSettings::default(),
            catalog: Catalog::new(),
            finders: Vec::new(),
            proxy: Box::new(NoProxy),
            preregistered: Vec::new(),
        }
    }

    pub fn settings(mut self, settings: ContainerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn current_settings(&self) -> &ContainerSettings {
        &self.settings
    }

    pub fn component<T: Component>(mut self) -> Self {
        self.catalog = self.catalog.component::<T>();
        self
    }

    pub fn configuration<C: Configuration>(mut self) -> Self {
        self.catalog = self.catalog.configuration::<C>();
        self
    }

    pub fn type_finder<Finder: TypeFinder + 'static>(mut self, finder: Finder) -> Self {
        self.finders.push(Box::new(finder));
        self
    }

    pub fn proxy_factory<Proxy: ProxyFactory + 'static>(mut self, proxy: Proxy) -> Self {
        self.proxy = Box::new(proxy);
        self
    }

    pub fn add_instance<T: Injectable>(self, instance: T) -> Self {
        self.add_instance_qualified(instance, Qualifier::default())
    }

    pub fn add_instance_qualified<T: Injectable>(
        mut self,
        instance: T,
        qualifier: impl Into<Qualifier>,
    ) -> Self {
        let qualifier = qualifier.into();
        let instances = InstanceSet::single(Instance::new(instance));
        self.preregistered.push(Arc::new(move || {
            DependencyEntry::singleton(qualifier.clone(), instances.clone())
        }));
        self
    }

    /// Adds a function producing `T`, see [Container::register_provider]
    pub fn add_provider<T: Injectable>(
        mut self,
        qualifier: impl Into<Qualifier>,
        scope: Scope,
        provider: impl Fn(&InjectionHandle) -> Result<T, DynError> + Send + Sync + 'static,
    ) -> Self {
        let qualifier = qualifier.into();
        let provider: Arc<dyn Fn(&InjectionHandle) -> Result<T, DynError> + Send + Sync> =
            Arc::new(provider);
        self.preregistered.push(Arc::new(move || {
            provider_entry(qualifier.clone(), scope, provider.clone())
        }));
        self
    }

    /// Creates the container without loading it
    pub fn build(self) -> Container {
        let ContainerBuilder {
            settings,
            catalog,
            mut finders,
            proxy,
            preregistered,
        } = self;

        tracing::debug!(
            "Building container with {} catalog entries, {} type finders and {} pre-registered entries",
            catalog.len(),
            finders.len(),
            preregistered.len()
        );

        if !catalog.is_empty() || finders.is_empty() {
            finders.insert(0, Box::new(catalog));
        }

        Container::new(settings, finders, proxy, preregistered)
    }

    /// Creates and loads the container
    pub async fn build_loaded(self) -> Result<Container, InitError> {
        let container = self.build();
        container.load().await?;
        Ok(container)
    }
}
