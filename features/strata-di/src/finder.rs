use std::{fmt::Debug, sync::Arc};

use crate::{
    configuration::{Configuration, ConfigurationDescriptor},
    factories::{ComponentFactory, DynComponent},
    manifest::Component,
    settings::ContainerSettings,
    types::TypeInfo,
};

/// A type found by a [TypeFinder]
#[derive(Clone)]
pub enum Discovered {
    Component(Arc<dyn DynComponent>),
    Configuration(Arc<ConfigurationDescriptor>),
}
impl Debug for Discovered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Discovered::Component(component) => component.fmt(f),
            Discovered::Configuration(configuration) => configuration.fmt(f),
        }
    }
}
impl Discovered {
    pub fn info(&self) -> TypeInfo {
        match self {
            Discovered::Component(component) => component.info(),
            Discovered::Configuration(configuration) => configuration.info,
        }
    }

    pub fn profiles(&self) -> &[String] {
        match self {
            Discovered::Component(component) => component.profiles(),
            Discovered::Configuration(configuration) => &configuration.profiles,
        }
    }
}

/// Supplies the types the container manages
///
/// The container only filters what it is given, by concreteness and active profiles.
pub trait TypeFinder: Send + Sync {
    fn find(&self, root_hint: &str, settings: &ContainerSettings) -> Vec<Discovered>;
}

/// A [TypeFinder] over an explicit list of types
///
/// A non empty root hint keeps only types whose path starts with it.
#[derive(Default, Clone, Debug)]
pub struct Catalog {
    entries: Vec<Discovered>,
}
impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component<T: Component>(mut self) -> Self {
        self.entries
            .push(Discovered::Component(ComponentFactory::<T>::descriptor()));
        self
    }

    pub fn configuration<C: Configuration>(mut self) -> Self {
        self.entries.push(Discovered::Configuration(Arc::new(
            ConfigurationDescriptor::of::<C>(),
        )));
        self
    }

    pub fn add(&mut self, discovered: Discovered) {
        self.entries.push(discovered);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
impl TypeFinder for Catalog {
    fn find(&self, root_hint: &str, _: &ContainerSettings) -> Vec<Discovered> {
        self.entries
            .iter()
            .filter(|discovered| discovered.info().type_name.starts_with(root_hint))
            .cloned()
            .collect()
    }
}
