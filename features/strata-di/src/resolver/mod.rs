use crate::{
    errors::InjectError, handle::InjectionHandle, qualifier::Qualifier, types::DependencyInfo,
};

pub mod arc;
pub mod composite;
pub mod lazy;

/// Allows custom behaviour on injection
///
/// The declared type of an injection site decides how it is resolved: `Arc<T>` directly, `Option<R>` optionally,
/// `Lazy<T>` on first access, `All<T>` as a snapshot of every registration.
pub trait Resolver: Sized + Send + 'static {
    fn resolve(handle: &InjectionHandle, qualifier: &Qualifier) -> Result<Self, InjectError>;

    fn dependency_info() -> DependencyInfo;
}
