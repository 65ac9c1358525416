use std::{
    any::Any,
    fmt::Debug,
    ops::Deref,
    sync::{Arc, PoisonError, RwLock, Weak},
};

use crate::{
    container::WeakContainer,
    errors::InjectError,
    handle::InjectionHandle,
    qualifier::Qualifier,
    resolver::Resolver,
    types::{DependencyInfo, Injectable, TypeInfo},
};

fn composite_info<T: ?Sized + Injectable>() -> DependencyInfo {
    DependencyInfo {
        composite: true,
        ..DependencyInfo::direct(TypeInfo::of::<T>())
    }
}

/// Every registration of `T`, resolved eagerly into a snapshot
///
/// The qualifier of the injection site is ignored, all registrations are included.
/// Order is by owning type name, then qualifier.
pub struct All<T: ?Sized + Injectable>(Vec<Arc<T>>);
impl<T: ?Sized + Injectable> Clone for All<T> {
    fn clone(&self) -> Self {
        All(self.0.clone())
    }
}
impl<T: ?Sized + Injectable + Debug> Debug for All<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}
impl<T: ?Sized + Injectable> Deref for All<T> {
    type Target = [Arc<T>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<'a, T: ?Sized + Injectable> IntoIterator for &'a All<T> {
    type Item = &'a Arc<T>;
    type IntoIter = std::slice::Iter<'a, Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
impl<T: ?Sized + Injectable> All<T> {
    pub fn into_inner(self) -> Vec<Arc<T>> {
        self.0
    }
}
impl<T: ?Sized + Injectable> Resolver for All<T> {
    fn resolve(handle: &InjectionHandle, _: &Qualifier) -> Result<Self, InjectError> {
        handle.require_all::<T>().map(All)
    }

    fn dependency_info() -> DependencyInfo {
        composite_info::<T>()
    }
}

/// Weak reference to a snapshot of every registration of `T`
///
/// The container holds the strong reference until it is unloaded, after that [WeakAll::upgrade] returns `None`.
pub struct WeakAll<T: ?Sized + Injectable>(Weak<Vec<Arc<T>>>);
impl<T: ?Sized + Injectable> Clone for WeakAll<T> {
    fn clone(&self) -> Self {
        WeakAll(self.0.clone())
    }
}
impl<T: ?Sized + Injectable> WeakAll<T> {
    pub fn upgrade(&self) -> Option<Arc<Vec<Arc<T>>>> {
        self.0.upgrade()
    }
}
impl<T: ?Sized + Injectable> Resolver for WeakAll<T> {
    fn resolve(handle: &InjectionHandle, _: &Qualifier) -> Result<Self, InjectError> {
        let snapshot = Arc::new(handle.require_all::<T>()?);
        let weak = Arc::downgrade(&snapshot);
        handle
            .container()
            .retain(snapshot as Arc<dyn Any + Send + Sync>);
        Ok(WeakAll(weak))
    }

    fn dependency_info() -> DependencyInfo {
        composite_info::<T>()
    }
}

/// Swappable snapshot of every registration of `T`
///
/// Starts with the registrations present at injection time, [AtomicAll::refresh] picks up later ones.
pub struct AtomicAll<T: ?Sized + Injectable> {
    current: Arc<RwLock<Arc<Vec<Arc<T>>>>>,
    container: WeakContainer,
}
impl<T: ?Sized + Injectable> Clone for AtomicAll<T> {
    fn clone(&self) -> Self {
        AtomicAll {
            current: self.current.clone(),
            container: self.container.clone(),
        }
    }
}
impl<T: ?Sized + Injectable> AtomicAll<T> {
    pub fn load(&self) -> Arc<Vec<Arc<T>>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the snapshot, returning the previous one
    pub fn store(&self, values: Vec<Arc<T>>) -> Arc<Vec<Arc<T>>> {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(values))
    }

    /// Resolves all registrations again and stores them
    pub fn refresh(&self) -> Result<Arc<Vec<Arc<T>>>, InjectError> {
        let container = self
            .container
            .upgrade()
            .ok_or(InjectError::ContainerDropped)?;
        let values = container.handle().require_all::<T>()?;
        self.store(values);
        Ok(self.load())
    }
}
impl<T: ?Sized + Injectable> Resolver for AtomicAll<T> {
    fn resolve(handle: &InjectionHandle, _: &Qualifier) -> Result<Self, InjectError> {
        Ok(AtomicAll {
            current: Arc::new(RwLock::new(Arc::new(handle.require_all::<T>()?))),
            container: handle.container().downgrade(),
        })
    }

    fn dependency_info() -> DependencyInfo {
        composite_info::<T>()
    }
}
