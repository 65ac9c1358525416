//! Strata Config provides a registry of configs that can be injected in the rest of the
//! application.
//!
//! Strata Config is split into two major parts:
//! 1. [ConfigProvider]: Used to create the registry of all configs
//! 2. [Config<T>]: A wrapper type to be able to resolve and retrieve configs
//!
//! # Examples
//!
//! ```rust
//! use strata_config::{ConfigProvider, WithConfig};
//! use strata_di::{ContainerBuilder, ContainerSettings};
//!
//! struct AppConfig {
//!     host: String,
//!     port: u16,
//! }
//!
//! let mut provider = ConfigProvider::new();
//! provider
//!     .add_config(AppConfig {
//!         host: "localhost".to_string(),
//!         port: 8080,
//!     })
//!     .unwrap()
//!     .add_config(ContainerSettings::default().with_profile("dev"))
//!     .unwrap();
//!
//! let builder = ContainerBuilder::new().with_config(provider);
//! assert_eq!(builder.current_settings().active_profiles, vec!["dev".to_string()]);
//! ```

mod config;
mod errors;
mod provider;

pub use config::Config;
pub use errors::ConfigError;
pub use provider::ConfigProvider;

use strata_di::{ContainerBuilder, ContainerSettings};

/// Registers a [ConfigProvider] with a container
pub trait WithConfig {
    /// Makes every config of `provider` injectable through [Config]
    ///
    /// A [ContainerSettings] stored in the provider replaces the settings of the builder.
    fn with_config(self, provider: ConfigProvider) -> Self;
}

impl WithConfig for ContainerBuilder {
    fn with_config(self, provider: ConfigProvider) -> Self {
        let builder = match provider.get_config::<ContainerSettings>() {
            Ok(Some(settings)) => {
                tracing::debug!("Applying container settings from config");
                self.settings((*settings).clone())
            }
            Ok(None) => self,
            Err(e) => {
                tracing::warn!("Ignoring stored container settings: {e}");
                self
            }
        };

        builder.add_instance(provider)
    }
}
