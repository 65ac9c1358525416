//! Interception of interface views
//!
//! A [ProxyFactory] may replace the view of a component under one of its abstract types with a wrapper. The
//! concrete instance itself is never replaced, only what callers see through the interface.

use std::{any::TypeId, collections::HashMap, sync::Arc};

use crate::{
    container::Container,
    errors::InjectError,
    types::{Binding, DynError, Injectable, Instance, InstanceSet, TypeInfo},
};

/// Wraps views of components under their declared abstract type
pub trait ProxyFactory: Send + Sync {
    /// Returns the instance to expose as `declared`
    ///
    /// Returning `view` unchanged means no interception.
    fn wrap(
        &self,
        view: Instance,
        declared: TypeInfo,
        container: &Container,
    ) -> Result<Instance, DynError>;
}

/// Never intercepts
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProxy;
impl ProxyFactory for NoProxy {
    fn wrap(&self, view: Instance, _: TypeInfo, _: &Container) -> Result<Instance, DynError> {
        Ok(view)
    }
}

type Decorate = dyn Fn(Instance) -> Result<Instance, DynError> + Send + Sync;

/// Proxy factory applying registered decorators per abstract type
///
/// ```ignore
/// Decorators::new().decorate::<dyn Repository>(|inner| Arc::new(CountingRepository::new(inner)))
/// ```
#[derive(Default, Clone)]
pub struct Decorators {
    decorators: HashMap<TypeId, Vec<Arc<Decorate>>>,
}
impl Decorators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a decorator for views of `I`, decorators of one type apply in registration order
    pub fn decorate<I: ?Sized + Injectable>(
        mut self,
        decorator: impl Fn(Arc<I>) -> Arc<I> + Send + Sync + 'static,
    ) -> Self {
        let decorate = move |view: Instance| {
            let inner = view.downcast::<I>().map_err(|actual| {
                format!(
                    "Decorator for '{}' got '{actual}'",
                    std::any::type_name::<I>()
                )
            })?;
            Ok(Instance::from_arc(decorator(inner)))
        };
        self.decorators
            .entry(TypeId::of::<I>())
            .or_default()
            .push(Arc::new(decorate));
        self
    }
}
impl ProxyFactory for Decorators {
    fn wrap(
        &self,
        view: Instance,
        declared: TypeInfo,
        _: &Container,
    ) -> Result<Instance, DynError> {
        let Some(decorators) = self.decorators.get(&declared.type_id) else {
            return Ok(view);
        };

        decorators
            .iter()
            .try_fold(view, |view, decorate| decorate(view))
    }
}

/// Builds the views of a freshly constructed instance
///
/// Root bindings are skipped. Views are handed to the proxy factory unless interception is disabled.
pub(crate) fn bind_views(
    primary: Instance,
    bindings: &[Binding],
    intercept: bool,
    container: &Container,
) -> Result<InstanceSet, InjectError> {
    let product = primary.info.type_name;
    let mut views = Vec::with_capacity(bindings.len());

    for binding in bindings.iter().filter(|binding| !binding.is_root()) {
        let Some(view) = binding.project(&primary) else {
            tracing::warn!(
                "Binding of {} as {} does not apply, skipping",
                product,
                binding.info
            );
            continue;
        };

        let view = match intercept {
            true => container
                .proxy_factory()
                .wrap(view, binding.info, container)
                .map_err(|error| InjectError::InterceptionFailed {
                    product,
                    declared: binding.info.type_name,
                    error,
                })?,
            false => view,
        };

        views.push(view);
    }

    Ok(InstanceSet { primary, views })
}
