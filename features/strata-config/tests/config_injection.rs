use std::sync::Arc;

use futures::executor::block_on;
use strata_config::{Config, ConfigProvider, WithConfig};
use strata_di::{
    BeanMethod, Component, Configuration, ConfigurationManifest, Constructor, ContainerBuilder,
    ContainerSettings, Manifest,
};

struct ServerConfig {
    port: u16,
}

struct Server {
    port: u16,
    banner: Option<Config<Banner>>,
}
impl Component for Server {
    fn manifest() -> Manifest<Self> {
        Manifest::new().constructor(
            Constructor::new(|args| {
                Ok(Server {
                    port: args.take::<Config<ServerConfig>>()?.port,
                    banner: args.take()?,
                })
            })
            .param::<Config<ServerConfig>>("config")
            .param::<Option<Config<Banner>>>("banner"),
        )
    }
}

struct Banner(String);

struct Address(String);

#[derive(Default)]
struct Network;
impl Configuration for Network {
    fn manifest() -> ConfigurationManifest<Self> {
        ConfigurationManifest::with_default().bean(
            BeanMethod::new("address", |_: &Network, args: &mut strata_di::Args| {
                let config = args.take::<Config<ServerConfig>>()?;
                Ok(Address(format!("0.0.0.0:{}", config.port)))
            })
            .param::<Config<ServerConfig>>("config"),
        )
    }
}

struct DevOnly;
impl Component for DevOnly {
    fn manifest() -> Manifest<Self> {
        Manifest::new()
            .profile("dev")
            .constructor(Constructor::new(|_| Ok(DevOnly)))
    }
}

fn provider() -> ConfigProvider {
    let mut provider = ConfigProvider::new();
    provider.add_config(ServerConfig { port: 8080 }).unwrap();
    provider
}

#[test]
fn configs_are_injected_into_components() {
    let container = block_on(
        ContainerBuilder::new()
            .with_config(provider())
            .component::<Server>()
            .build_loaded(),
    )
    .unwrap();

    let server = container.require::<Server>().unwrap();
    assert_eq!(server.port, 8080);
    assert!(server.banner.is_none());
}

#[test]
fn configs_are_injected_into_provider_methods() {
    let container = block_on(
        ContainerBuilder::new()
            .with_config(provider())
            .configuration::<Network>()
            .build_loaded(),
    )
    .unwrap();

    let address = container.require::<Address>().unwrap();
    assert_eq!(address.0, "0.0.0.0:8080");

    let provider = container.require::<ConfigProvider>().unwrap();
    assert!(provider.contains::<ServerConfig>());
}

#[test]
fn missing_config_fails_the_load() {
    let result = block_on(
        ContainerBuilder::new()
            .with_config(ConfigProvider::new())
            .component::<Server>()
            .build_loaded(),
    );

    let message = result.unwrap_err().to_string();
    assert!(message.contains("Server"), "{message}");
}

#[test]
fn stored_settings_configure_the_container() {
    let mut provider = provider();
    provider
        .add_config(ContainerSettings::default().with_profile("dev"))
        .unwrap()
        .add_config(Banner("hello".into()))
        .unwrap();

    let container = block_on(
        ContainerBuilder::new()
            .with_config(provider)
            .component::<DevOnly>()
            .component::<Server>()
            .build_loaded(),
    )
    .unwrap();

    assert!(container.get_dependency::<DevOnly>().is_some());
    let server: Arc<Server> = container.require().unwrap();
    assert_eq!(server.banner.as_ref().map(|b| b.0.as_str()), Some("hello"));
}
