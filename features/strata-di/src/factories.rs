use std::{any::type_name, fmt::Debug, sync::Arc};

use crate::{
    errors::InjectError,
    handle::InjectionHandle,
    manifest::{Component, InjectionPoint, Manifest},
    proxy::bind_views,
    qualifier::{Qualified, Qualifier},
    registry::{index_types, DependencyEntry, Factory},
    types::{Binding, Instance, InstanceSet, Scope, TypeInfo},
};

/// Wrapper Trait for component manifests, building instances of Any
///
/// The qualifier of the component comes from [Qualified].
pub trait DynComponent: Qualified + Send + Sync {
    fn info(&self) -> TypeInfo;

    fn scope(&self) -> Scope;

    /// Whether views may be wrapped by the proxy factory
    fn intercept(&self) -> bool;

    fn exclude_root_registration(&self) -> bool;

    fn profiles(&self) -> &[String];

    fn bindings(&self) -> &[Binding];

    /// Parameters of the selected constructor followed by all fields
    fn dependencies(&self) -> Vec<InjectionPoint>;

    /// Constructs, injects, binds and initializes a new instance
    fn instantiate(&self, handle: &InjectionHandle) -> Result<InstanceSet, InjectError>;
}
impl Debug for dyn DynComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynComponent")
            .field("type", &self.info().type_name)
            .field("qualifier", self.qualifier())
            .field("scope", &self.scope())
            .finish()
    }
}

/// Abstract types the component is indexed under
pub(crate) fn indexed_types(component: &dyn DynComponent) -> Vec<TypeInfo> {
    index_types(component.bindings(), component.exclude_root_registration())
}

/// Registry entry for a component
///
/// Singletons have to be built beforehand, prototypes register their factory.
pub(crate) fn component_entry(
    component: Arc<dyn DynComponent>,
    built: Option<InstanceSet>,
) -> DependencyEntry {
    let info = component.info();
    let qualifier = component.qualifier().clone();
    let indexed_under = indexed_types(component.as_ref());

    match built {
        Some(instances) => {
            let mut entry = DependencyEntry::singleton(qualifier, instances);
            entry.indexed_under = indexed_under;
            entry
        }
        None => {
            let factory: Factory = Arc::new(move |handle| component.instantiate(handle));
            DependencyEntry::prototype(info, qualifier, indexed_under, factory)
        }
    }
}

/// [DynComponent] for any [Component]
pub struct ComponentFactory<T: Component> {
    manifest: Manifest<T>,
}
impl<T: Component> ComponentFactory<T> {
    pub fn new() -> Self {
        ComponentFactory {
            manifest: T::manifest(),
        }
    }

    /// Type erased descriptor of `T`
    pub fn descriptor() -> Arc<dyn DynComponent> {
        Arc::new(Self::new())
    }
}
impl<T: Component> Default for ComponentFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> Qualified for ComponentFactory<T> {
    fn qualifier(&self) -> &Qualifier {
        &self.manifest.qualifier
    }
}

impl<T: Component> DynComponent for ComponentFactory<T> {
    fn info(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn scope(&self) -> Scope {
        self.manifest.scope
    }

    fn intercept(&self) -> bool {
        self.manifest.intercept
    }

    fn exclude_root_registration(&self) -> bool {
        self.manifest.exclude_root_registration
    }

    fn profiles(&self) -> &[String] {
        &self.manifest.profiles
    }

    fn bindings(&self) -> &[Binding] {
        &self.manifest.bindings
    }

    fn dependencies(&self) -> Vec<InjectionPoint> {
        self.manifest.dependencies()
    }

    fn instantiate(&self, handle: &InjectionHandle) -> Result<InstanceSet, InjectError> {
        let mut instance = self.manifest.construct(handle)?;
        self.manifest.inject_fields(&mut instance, handle)?;

        let instance = Arc::new(instance);
        let instances = bind_views(
            Instance::from_arc(instance.clone()),
            &self.manifest.bindings,
            self.manifest.intercept,
            handle.container(),
        )?;

        self.manifest.run_hooks(&instance)?;

        tracing::trace!("Instantiated {}", type_name::<T>());
        Ok(instances)
    }
}
