use std::{
    fmt::Debug,
    ops::Deref,
    sync::{Arc, OnceLock},
};

use crate::{
    container::WeakContainer,
    errors::{InjectError, RequireError},
    handle::InjectionHandle,
    qualifier::Qualifier,
    resolver::Resolver,
    types::{DependencyInfo, Injectable, TypeInfo},
};

/// Lazily resolved dependency
///
/// Resolution is deferred until first access and memoized afterwards. Lazy dependencies are not part of the
/// dependency graph, which makes them the way to break a circular dependency.
///
/// ### Panics
///
/// [Lazy::get] and [Deref] panic if the dependency can not be resolved:
/// - It is accessed before the dependency was built
/// - It is accessed after the container was unloaded or dropped
///
/// Use [Lazy::try_get] or [Lazy::wait] where that can happen.
pub struct Lazy<T: ?Sized + Injectable>(Arc<LazyInner<T>>);
impl<T: ?Sized + Injectable> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Lazy(self.0.clone())
    }
}
impl<T: ?Sized + Injectable + Debug> Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.once.get() {
            Some(resolved) => f.debug_tuple("Lazy").field(resolved).finish(),
            None => f.debug_tuple("Lazy").field(&"<unresolved>").finish(),
        }
    }
}
struct LazyInner<T: ?Sized + Injectable> {
    container: WeakContainer,
    qualifier: Qualifier,
    once: OnceLock<Arc<T>>,
}
impl<T: ?Sized + Injectable> Deref for Lazy<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Self::Target {
        self.get()
    }
}
impl<T: ?Sized + Injectable> Resolver for Lazy<T> {
    fn resolve(handle: &InjectionHandle, qualifier: &Qualifier) -> Result<Self, InjectError> {
        Ok(Lazy(Arc::new(LazyInner {
            container: handle.container().downgrade(),
            qualifier: qualifier.clone(),
            once: OnceLock::new(),
        })))
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo {
            lazy: true,
            ..DependencyInfo::direct(TypeInfo::of::<T>())
        }
    }
}
impl<T: ?Sized + Injectable> Lazy<T> {
    /// Accesses the Lazy Dependency
    ///
    /// # Panics
    /// - When the dependency can not be resolved
    pub fn get(&self) -> &Arc<T> {
        match self.try_get() {
            Ok(resolved) => resolved,
            Err(e) => panic!(
                "Lazy {} accessed but could not be resolved: {e}",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Try to access the lazy dependency
    ///
    /// Failures are not memoized, a later call may succeed.
    pub fn try_get(&self) -> Result<&Arc<T>, InjectError> {
        if let Some(resolved) = self.0.once.get() {
            return Ok(resolved);
        }

        let container = self
            .0
            .container
            .upgrade()
            .ok_or(InjectError::ContainerDropped)?;
        let resolved = container.handle().require::<T>(&self.0.qualifier)?;

        // Another thread may have won the race, both resolved the same registration
        Ok(self.0.once.get_or_init(|| resolved))
    }

    /// Waits until the container finished loading, then resolves
    pub async fn wait(&self) -> Result<&Arc<T>, InjectError> {
        if let Some(resolved) = self.0.once.get() {
            return Ok(resolved);
        }

        let container = self
            .0
            .container
            .upgrade()
            .ok_or(InjectError::ContainerDropped)?;
        container.loaded().await.map_err(RequireError::from)?;
        self.try_get()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.once.get().is_some()
    }
}

/// Lazy dependency which may be missing
pub struct LazyOption<T: ?Sized + Injectable> {
    lazy: Lazy<T>,
}
impl<T: ?Sized + Injectable + Debug> Debug for LazyOption<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LazyOption").field(&self.lazy).finish()
    }
}
impl<T: ?Sized + Injectable> Resolver for LazyOption<T> {
    fn resolve(handle: &InjectionHandle, qualifier: &Qualifier) -> Result<Self, InjectError> {
        Ok(LazyOption {
            lazy: Lazy::<T>::resolve(handle, qualifier)?,
        })
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo {
            optional: true,
            ..Lazy::<T>::dependency_info()
        }
    }
}
impl<T: ?Sized + Injectable> LazyOption<T> {
    /// Accesses the Lazy Dependency - returning an error on access
    pub fn try_get(&self) -> Result<Option<&Arc<T>>, InjectError> {
        match self.lazy.try_get() {
            Ok(resolved) => Ok(Some(resolved)),
            Err(InjectError::RequireError(RequireError::TypeMissing { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Accesses the Lazy Dependency
    ///
    /// # Panics
    /// - If resolution fails for any reason other than the type missing
    pub fn get(&self) -> Option<&Arc<T>> {
        match self.try_get() {
            Ok(resolved) => resolved,
            Err(err) => panic!("Accessed LazyOption after DI failure: {err:?}"),
        }
    }
}
