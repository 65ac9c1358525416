use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    container::Container,
    errors::{InjectError, RegistrationError, RequireError},
    qualifier::Qualifier,
    resolver::Resolver,
    types::{Injectable, Instance, TypeInfo},
};

/// Values handed to [Container::new_instance_with]
///
/// They take precedence over registered instances of the same type.
#[derive(Default, Clone, Debug)]
pub struct ExtraArgs {
    values: Vec<Instance>,
}
impl ExtraArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Injectable>(self, value: T) -> Self {
        self.with_arc(Arc::new(value))
    }

    pub fn with_arc<T: ?Sized + Injectable>(mut self, value: Arc<T>) -> Self {
        self.values.push(Instance::from_arc(value));
        self
    }

    fn find<T: ?Sized + Injectable>(&self) -> Option<Arc<T>> {
        self.values
            .iter()
            .find_map(|value| value.downcast::<T>().ok())
    }
}

/// Identifies one outermost resolution and everything built on its behalf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BuildId(u64);
impl BuildId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        BuildId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// DI Handle for resolving dependencies while something is being built.
///
/// The handle remembers the chain of types currently under construction, so re-entering one of them is reported
/// instead of recursing forever.
#[derive(Clone)]
pub struct InjectionHandle {
    container: Container,
    chain: Vec<TypeInfo>,
    extra: Option<Arc<ExtraArgs>>,
    build: BuildId,
    /// Handles of the loader may use the registry before the container is loaded
    loading: bool,
}
impl InjectionHandle {
    pub(crate) fn new(container: Container) -> Self {
        InjectionHandle {
            container,
            chain: Vec::new(),
            extra: None,
            build: BuildId::next(),
            loading: false,
        }
    }

    pub(crate) fn for_load(container: Container) -> Self {
        InjectionHandle {
            loading: true,
            ..Self::new(container)
        }
    }

    pub(crate) fn with_extra(mut self, extra: ExtraArgs) -> Self {
        self.extra = Some(Arc::new(extra));
        self
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Types currently being built through this handle, outermost first
    pub fn chain(&self) -> &[TypeInfo] {
        &self.chain
    }

    pub(crate) fn build(&self) -> BuildId {
        self.build
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.loading
    }

    /// Child handle for building `info`
    ///
    /// Extra arguments only apply to the outermost product, so they are not carried over.
    pub(crate) fn enter(&self, info: TypeInfo) -> Result<InjectionHandle, RegistrationError> {
        if self.chain.contains(&info) {
            let mut chain = self.chain.clone();
            chain.push(info);
            return Err(RegistrationError::CircularRegistration { chain });
        }

        let mut chain = self.chain.clone();
        chain.push(info);
        Ok(InjectionHandle {
            container: self.container.clone(),
            chain,
            extra: None,
            build: self.build,
            loading: self.loading,
        })
    }

    pub fn resolve<R: Resolver>(&self) -> Result<R, InjectError> {
        R::resolve(self, &Qualifier::default())
    }

    pub fn resolve_qualified<R: Resolver>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Result<R, InjectError> {
        R::resolve(self, &qualifier.into())
    }

    /// Requires the single registration of `T` with the given qualifier
    pub fn require<T: ?Sized + Injectable>(
        &self,
        qualifier: &Qualifier,
    ) -> Result<Arc<T>, InjectError> {
        if let Some(value) = self.extra.as_ref().and_then(|extra| extra.find::<T>()) {
            return Ok(value);
        }

        let info = TypeInfo::of::<T>();
        let instance = self.container.resolve_instance(self, info, qualifier)?;
        Self::downcast(&instance)
    }

    /// Requires every registration of `T`, regardless of qualifier
    pub fn require_all<T: ?Sized + Injectable>(&self) -> Result<Vec<Arc<T>>, InjectError> {
        let info = TypeInfo::of::<T>();
        self.container
            .resolve_all(self, info)?
            .iter()
            .map(Self::downcast)
            .collect()
    }

    fn downcast<T: ?Sized + Injectable>(instance: &Instance) -> Result<Arc<T>, InjectError> {
        instance.downcast::<T>().map_err(|actual_type| {
            RequireError::DowncastFailed {
                required_type: std::any::type_name::<T>(),
                actual_type,
            }
            .into()
        })
    }
}
