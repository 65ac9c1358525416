use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt::Debug,
    sync::Arc,
};

use strata_di::{Injectable, TypeInfo};

use crate::errors::ConfigError;

/// A provider to register all configs.
///
/// Configs can be registered and retrieved based on type.
#[derive(Default, Clone)]
pub struct ConfigProvider {
    configs: HashMap<TypeId, (TypeInfo, Arc<dyn Any + Send + Sync + 'static>)>,
}
impl Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.configs.values().map(|(info, _)| info.type_name))
            .finish()
    }
}

impl ConfigProvider {
    /// Initializes an empty Config Provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve a config with specified type.
    ///
    /// Returns `Ok(None)` if no config of that type was added.
    pub fn get_config<T: Injectable>(&self) -> Result<Option<Arc<T>>, ConfigError> {
        let Some((info, entry)) = self.configs.get(&TypeId::of::<T>()) else {
            return Ok(None);
        };

        entry
            .clone()
            .downcast()
            .map(Some)
            .map_err(|_| ConfigError::Mismatch(*info))
    }

    /// Retrieve a config, treating a missing one as an error
    pub fn require_config<T: Injectable>(&self) -> Result<Arc<T>, ConfigError> {
        self.get_config()?
            .ok_or_else(|| ConfigError::Missing(TypeInfo::of::<T>()))
    }

    /// Add a config to the registry.
    ///
    /// If the config type is already registered, it will return a
    /// [`ConfigError::AlreadyRegistered`] error
    pub fn add_config<T: Injectable>(&mut self, config: T) -> Result<&mut Self, ConfigError> {
        let info = TypeInfo::of::<T>();

        if self.configs.contains_key(&info.type_id) {
            return Err(ConfigError::AlreadyRegistered(info));
        }

        tracing::debug!("Adding config {info}");
        self.configs.insert(info.type_id, (info, Arc::new(config)));
        Ok(self)
    }

    /// Can optionally add a config to the registry.
    ///
    /// If the config provided is `Some(T)`, it will be the same as calling [`ConfigProvider::add_config`]
    /// If the config provided is `None`, then the function just returns `Ok(self)` for chaining
    pub fn maybe_add_config<T: Injectable>(
        &mut self,
        config: Option<T>,
    ) -> Result<&mut Self, ConfigError> {
        match config {
            Some(c) => self.add_config(c),
            None => Ok(self),
        }
    }

    pub fn contains<T: Injectable>(&self) -> bool {
        self.configs.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Port(u16);

    #[test]
    fn configs_are_keyed_by_type() {
        let mut provider = ConfigProvider::new();
        provider
            .add_config(Port(8080))
            .unwrap()
            .add_config("name".to_string())
            .unwrap();

        assert_eq!(*provider.get_config::<Port>().unwrap().unwrap(), Port(8080));
        assert_eq!(provider.len(), 2);
        assert!(provider.get_config::<u32>().unwrap().is_none());
    }

    #[test]
    fn adding_twice_is_rejected() {
        let mut provider = ConfigProvider::new();
        provider.add_config(Port(1)).unwrap();

        assert_eq!(
            provider.add_config(Port(2)).unwrap_err(),
            ConfigError::AlreadyRegistered(TypeInfo::of::<Port>())
        );
        assert_eq!(*provider.require_config::<Port>().unwrap(), Port(1));
    }

    #[test]
    fn missing_configs_are_errors_when_required() {
        let mut provider = ConfigProvider::new();
        provider.maybe_add_config::<Port>(None).unwrap();

        assert!(!provider.contains::<Port>());
        assert_eq!(
            provider.require_config::<Port>().unwrap_err(),
            ConfigError::Missing(TypeInfo::of::<Port>())
        );
    }
}
