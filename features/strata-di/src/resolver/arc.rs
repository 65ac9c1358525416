use std::sync::Arc;

use crate::{
    container::Container,
    errors::{InjectError, RequireError},
    handle::InjectionHandle,
    qualifier::Qualifier,
    resolver::Resolver,
    types::{DependencyInfo, Injectable, TypeInfo},
};

impl<T: ?Sized + Injectable> Resolver for Arc<T> {
    fn resolve(handle: &InjectionHandle, qualifier: &Qualifier) -> Result<Self, InjectError> {
        handle.require::<T>(qualifier)
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::direct(TypeInfo::of::<T>())
    }
}

impl<Resolvable: Resolver> Resolver for Option<Resolvable> {
    fn resolve(handle: &InjectionHandle, qualifier: &Qualifier) -> Result<Self, InjectError> {
        match Resolvable::resolve(handle, qualifier) {
            Ok(resolved) => Ok(Some(resolved)),
            // If the required type is not registered Option does not fail
            Err(InjectError::RequireError(RequireError::TypeMissing { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn dependency_info() -> DependencyInfo {
        let original = Resolvable::dependency_info();
        DependencyInfo {
            optional: true,
            ..original
        }
    }
}

/// Components may depend on the container itself
impl Resolver for Container {
    fn resolve(handle: &InjectionHandle, _: &Qualifier) -> Result<Self, InjectError> {
        Ok(handle.container().clone())
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::direct(TypeInfo::of::<Container>())
    }
}
