use std::{ops::Deref, sync::Arc};

use strata_di::{
    DependencyInfo, InjectError, Injectable, InjectionHandle, Qualifier, RequireError, Resolver,
    TypeInfo,
};

use crate::{errors::ConfigError, provider::ConfigProvider};

/// A wrapper type to allow for config injections
///
/// This provides a simple way to retrieve configs from the [ConfigProvider] registered with the container,
/// and inject them into a component or provider method as a dependency
///
/// # Example
/// ```ignore
/// struct MyModuleConfig {
///     enabled: bool,
/// }
///
/// let mut provider = ConfigProvider::new();
/// provider.add_config(MyModuleConfig { enabled: true })?;
///
/// impl Component for MyModule {
///     fn manifest() -> Manifest<Self> {
///         Manifest::new().constructor(
///             Constructor::new(|args| Ok(MyModule::new(args.take::<Config<MyModuleConfig>>()?.enabled)))
///                 .param::<Config<MyModuleConfig>>("config"),
///         )
///     }
/// }
///
/// ContainerBuilder::new().with_config(provider).component::<MyModule>()
/// ```
pub struct Config<T> {
    inner: Arc<T>,
}
impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Config {
            inner: self.inner.clone(),
        }
    }
}
impl<T> Deref for Config<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
impl<T> Config<T> {
    pub fn inner(&self) -> Arc<T> {
        self.inner.clone()
    }

    pub fn into_inner(self) -> Arc<T> {
        self.inner
    }
}

impl<T: Injectable> Resolver for Config<T> {
    fn resolve(handle: &InjectionHandle, qualifier: &Qualifier) -> Result<Self, InjectError> {
        let config_provider = handle.require::<ConfigProvider>(&Qualifier::default())?;

        let inner = config_provider
            .require_config::<T>()
            .map_err(|e| match e {
                // Lets `Option<Config<T>>` treat a missing config as absent
                ConfigError::Missing(info) => RequireError::TypeMissing {
                    type_name: info.type_name,
                    qualifier: qualifier.clone(),
                }
                .into(),
                e => InjectError::Other(Box::new(e)),
            })?;

        Ok(Config { inner })
    }

    /// Configs are read from the provider, which is registered before anything is built
    fn dependency_info() -> DependencyInfo {
        DependencyInfo::direct(TypeInfo::of::<ConfigProvider>())
    }
}
