//! One load cycle of a [Container]
//!
//! Planning runs single threaded: discovery, the service graph, its layers, the bean graph and its phases. After that
//! every layer is submitted as one batch to the worker pools and awaited before the next layer starts. Entries built
//! by a layer are registered once the whole layer succeeded.

use std::{
    any::TypeId,
    collections::HashMap,
    fmt::Debug,
    sync::Arc,
};

use crate::{
    bean_graph::{BeanDescriptor, BeanGraph, BeanId},
    configuration::ConfigurationDescriptor,
    container::{Container, LoadState},
    dependency_graph::{DependencyGraph, DependencyGraphErrors, ServiceSet},
    errors::InitError,
    factories::{component_entry, DynComponent},
    finder::Discovered,
    phases::{split, Phase, PhasePlan},
    pool::Task,
    registry::{index_types, DependencyEntry, Factory},
    types::{Instance, InstanceSet, Scope, TypeInfo},
};

/// Result of planning a load
pub struct LoadPlan {
    pub graph: DependencyGraph,
    pub services: Arc<ServiceSet>,
    pub service_layers: Vec<Vec<TypeInfo>>,
    pub beans: BeanGraph,
    pub phases: PhasePlan,
}
impl Debug for LoadPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadPlan")
            .field("service_layers", &self.service_layers)
            .field("phases", &self.phases)
            .finish()
    }
}
impl LoadPlan {
    /// Service layer of a discovered component
    pub fn layer_of(&self, type_id: TypeId) -> Option<usize> {
        self.service_layers
            .iter()
            .position(|layer| layer.iter().any(|info| info.type_id == type_id))
    }

    pub fn phase_of(&self, id: &BeanId) -> Option<Phase> {
        self.phases.phase_of(id)
    }
}

type LayerTask = Task<Result<DependencyEntry, InitError>>;

pub(crate) struct Loader {
    container: Container,
}

impl Loader {
    pub(crate) fn new(container: Container) -> Self {
        Loader { container }
    }

    pub(crate) async fn run(self) -> Result<(), InitError> {
        let (components, configurations) = self.discover();
        tracing::debug!(
            "Loading {} components and {} configurations",
            components.len(),
            configurations.len()
        );

        let plan = self.plan(&components, &configurations).await?;
        self.container.set_plan(plan.clone());

        for preregistration in self.container.preregistered() {
            self.container.registry().register(preregistration())?;
        }

        let configuration_instances = self.create_configurations(&configurations)?;

        self.check_aborted()?;
        self.load_beans(&plan, Phase::Before, &configuration_instances)
            .await?;

        self.container.set_state(LoadState::LoadingServiceLayers);
        let components = components
            .into_iter()
            .map(|component| (component.info().type_id, component))
            .collect::<HashMap<_, _>>();
        for (idx, layer) in plan.service_layers.iter().enumerate() {
            tracing::debug!("Loading service layer {idx} with {} services", layer.len());
            let tasks = layer
                .iter()
                .filter_map(|info| components.get(&info.type_id))
                .map(|component| self.component_task(component.clone()))
                .collect();
            self.run_layer(&format!("service layer {idx}"), tasks).await?;
        }

        self.container.set_state(LoadState::LoadingPhaseAfter);
        self.load_beans(&plan, Phase::After, &configuration_instances)
            .await?;

        self.check_aborted()
    }

    /// Asks every type finder, then drops what may not be loaded
    fn discover(&self) -> (Vec<Arc<dyn DynComponent>>, Vec<Arc<ConfigurationDescriptor>>) {
        let settings = self.container.settings();
        let mut components = Vec::new();
        let mut configurations = Vec::new();

        for finder in self.container.finders() {
            for discovered in finder.find(&settings.root_hint, settings) {
                let info = discovered.info();
                if info.is_abstract {
                    tracing::warn!("Skipping abstract type {info}");
                    continue;
                }
                if !settings.is_active(discovered.profiles()) {
                    tracing::debug!("Skipping {info}, none of {:?} is active", discovered.profiles());
                    continue;
                }

                match discovered {
                    Discovered::Component(component) => components.push(component),
                    Discovered::Configuration(configuration) => configurations.push(configuration),
                }
            }
        }

        (components, configurations)
    }

    async fn plan(
        &self,
        components: &[Arc<dyn DynComponent>],
        configurations: &[Arc<ConfigurationDescriptor>],
    ) -> Result<Arc<LoadPlan>, InitError> {
        let services = Arc::new(ServiceSet::new(components));
        let graph = DependencyGraph::build(
            components,
            services.clone(),
            self.container.pools(),
            self.container.settings().graph_parallel_threshold,
        )
        .await?;
        graph.check()?;
        let service_layers = graph.layers().map_err(DependencyGraphErrors::from)?;

        let mut beans = BeanGraph::build(configurations)?;
        let phases = split(&mut beans, &services);

        tracing::debug!(
            "Planned {} service layers, {} bean layers before and {} after",
            service_layers.len(),
            phases.before.len(),
            phases.after.len()
        );

        Ok(Arc::new(LoadPlan {
            graph,
            services,
            service_layers,
            beans,
            phases,
        }))
    }

    /// Creates and registers one instance per configuration
    fn create_configurations(
        &self,
        configurations: &[Arc<ConfigurationDescriptor>],
    ) -> Result<HashMap<TypeId, Instance>, InitError> {
        let mut instances = HashMap::new();
        for configuration in configurations {
            let instance =
                configuration
                    .create()
                    .map_err(|error| InitError::ConfigurationFailed {
                        configuration: configuration.info.type_name,
                        error: Arc::new(error),
                    })?;

            self.container.registry().register(DependencyEntry::singleton(
                Default::default(),
                InstanceSet::single(instance.clone()),
            ))?;
            instances.insert(configuration.info.type_id, instance);
        }
        Ok(instances)
    }

    async fn load_beans(
        &self,
        plan: &LoadPlan,
        phase: Phase,
        configurations: &HashMap<TypeId, Instance>,
    ) -> Result<(), InitError> {
        for (idx, layer) in plan.phases.layers(phase).iter().enumerate() {
            tracing::debug!("Loading {phase:?} bean layer {idx} with {} beans", layer.len());
            let mut tasks = Vec::with_capacity(layer.len());
            for id in layer {
                let Some(bean) = plan.beans.get(id) else {
                    continue;
                };
                let Some(configuration) = configurations.get(&bean.method.owner.type_id) else {
                    continue;
                };
                tasks.push(self.bean_task(bean.clone(), configuration.clone()));
            }
            self.run_layer(&format!("{phase:?} bean layer {idx}"), tasks)
                .await?;
        }
        Ok(())
    }

    /// Runs one layer and registers its entries
    ///
    /// The first error wins, later errors of the same layer are only logged.
    async fn run_layer(&self, label: &str, tasks: Vec<LayerTask>) -> Result<(), InitError> {
        if tasks.is_empty() {
            return Ok(());
        }
        self.check_aborted()?;

        let results = self.container.pools().run_batch(tasks).await?;

        let mut first_error = None;
        let mut entries = Vec::with_capacity(results.len());
        for result in results {
            match result.and_then(|built| built) {
                Ok(entry) => entries.push(entry),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => tracing::warn!("Dropping further error of {label}: {e}"),
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.check_aborted()?;
        for entry in entries {
            self.container.registry().register(entry)?;
        }
        Ok(())
    }

    fn component_task(&self, component: Arc<dyn DynComponent>) -> LayerTask {
        let container = self.container.clone();
        let info = component.info();

        Task::new(info.type_name, move || {
            if container.is_aborted() {
                return Err(InitError::Aborted);
            }

            let built = match component.scope() {
                Scope::Prototype => None,
                Scope::Singleton => {
                    let handle = container.load_handle().enter(info)?;
                    let built = component.instantiate(&handle).map_err(|error| {
                        InitError::ComponentFailed {
                            product: info.type_name,
                            error: Arc::new(error),
                        }
                    })?;
                    Some(built)
                }
            };

            tracing::trace!("Built {info}");
            Ok(component_entry(component, built))
        })
    }

    fn bean_task(&self, bean: BeanDescriptor, configuration: Instance) -> LayerTask {
        let container = self.container.clone();
        let BeanDescriptor { id, method, .. } = bean;

        Task::new(id.to_string(), move || {
            if container.is_aborted() {
                return Err(InitError::Aborted);
            }

            let qualifier = method.qualifier.clone();
            let scope = method.scope;
            let entry = match scope {
                Scope::Singleton => {
                    let handle = container.load_handle().enter(method.produces)?;
                    let built = method.invoke(&configuration, &handle).map_err(|error| {
                        InitError::BeanFailed {
                            bean: id.to_string(),
                            error: Arc::new(error),
                        }
                    })?;
                    DependencyEntry::singleton(qualifier, built)
                }
                Scope::Prototype => {
                    let owner = method.produces;
                    let indexed_under = index_types(&method.bindings, false);
                    let factory: Factory =
                        Arc::new(move |handle| method.invoke(&configuration, handle));
                    DependencyEntry::prototype(owner, qualifier, indexed_under, factory)
                }
            };

            tracing::trace!("Built bean {id}");
            Ok(entry)
        })
    }

    fn check_aborted(&self) -> Result<(), InitError> {
        match self.container.is_aborted() {
            true => Err(InitError::Aborted),
            false => Ok(()),
        }
    }
}
