use std::{error::Error, sync::Arc};

use strata_di::{
    All, Args, BeanMethod, Component, Configuration, ConfigurationManifest, Constructor,
    ContainerBuilder, Lazy, Manifest,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let container = futures::executor::block_on(
        ContainerBuilder::new()
            .add_instance("demo".to_string())
            .configuration::<Storage>()
            .component::<Repository>()
            .component::<Greeter>()
            .component::<Audit>()
            .build_loaded(),
    )?;

    println!("{container:?}");
    if let Some(plan) = container.plan() {
        println!("{plan:?}");
    }

    let greeter = container.require::<Greeter>()?;
    println!("{}", greeter.greet("world"));

    let audit = container.require::<Audit>()?;
    println!("audit sees {} channels", audit.channels.len());

    container.unload();
    Ok(())
}

trait Channel: Send + Sync {
    fn name(&self) -> String;
}

/// Plain url produced by a provider method
struct Url(String);

struct Repository {
    url: Arc<Url>,
}
impl Channel for Repository {
    fn name(&self) -> String {
        format!("repository at {}", self.url.0)
    }
}
impl Component for Repository {
    fn manifest() -> Manifest<Self> {
        Manifest::new()
            .provides(|repository: Arc<Repository>| repository as Arc<dyn Channel>)
            .constructor(
                Constructor::new(|args| Ok(Repository { url: args.take()? }))
                    .param::<Arc<Url>>("url"),
            )
    }
}

struct Greeter {
    app: Arc<String>,
    repository: Arc<Repository>,
    audit: Lazy<Audit>,
}
impl Greeter {
    fn greet(&self, name: &str) -> String {
        format!(
            "[{}] hello {name} from {}, audited by {}",
            self.app,
            self.repository.name(),
            self.audit.label
        )
    }
}
impl Component for Greeter {
    fn manifest() -> Manifest<Self> {
        Manifest::new()
            .provides(|greeter: Arc<Greeter>| greeter as Arc<dyn Channel>)
            .constructor(
                Constructor::new(|args| {
                    Ok(Greeter {
                        app: args.take()?,
                        repository: args.take()?,
                        audit: args.take()?,
                    })
                })
                .param::<Arc<String>>("app")
                .param::<Arc<Repository>>("repository")
                .param::<Lazy<Audit>>("audit"),
            )
            .post_construct("announce", 0, |greeter| {
                tracing::info!("Greeter for {} is ready", greeter.app);
                Ok(())
            })
    }
}
impl Channel for Greeter {
    fn name(&self) -> String {
        "greeter".into()
    }
}

#[derive(Default)]
struct Audit {
    label: String,
    channels: Vec<Arc<dyn Channel>>,
}
impl Component for Audit {
    fn manifest() -> Manifest<Self> {
        Manifest::new()
            .constructor(Constructor::new(|_| {
                Ok(Audit {
                    label: "audit".into(),
                    channels: Vec::new(),
                })
            }))
            .field("channels", |audit: &mut Audit, channels: All<dyn Channel>| {
                audit.channels = channels.into_inner()
            })
    }
}

#[derive(Default)]
struct Storage;
impl Configuration for Storage {
    fn manifest() -> ConfigurationManifest<Self> {
        ConfigurationManifest::with_default().bean(
            BeanMethod::new("url", |_: &Storage, args: &mut Args| {
                let app = args.take::<Arc<String>>()?;
                Ok(Url(format!("mem://{app}")))
            })
            .param::<Arc<String>>("app"),
        )
    }
}
