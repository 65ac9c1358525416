use std::{
    any::TypeId,
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Arc,
};

use thiserror::Error;

use crate::{
    errors::{join_chain, InitError},
    factories::DynComponent,
    pool::{Task, WorkerPools},
    types::TypeInfo,
};

pub mod extractor;
pub mod layers;

pub use extractor::{extract, ServiceSet, ServiceSummary};

/// Graph of all discovered services
/// Used to check circular dependencies and to order instantiation into layers
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    map: BTreeMap<TypeId, DependencyGraphEntry>,
}
impl DependencyGraph {
    /// Extracts the edges of every component
    ///
    /// Above `parallel_threshold` components the extraction is split into chunks on the worker pool.
    pub(crate) async fn build(
        components: &[Arc<dyn DynComponent>],
        services: Arc<ServiceSet>,
        pools: &WorkerPools,
        parallel_threshold: usize,
    ) -> Result<Self, InitError> {
        let extracted = if components.len() > parallel_threshold {
            Self::extract_parallel(components, services, pools).await?
        } else {
            components
                .iter()
                .map(|component| (component.info(), extract(component.as_ref(), &services)))
                .collect()
        };

        let mut graph = Self::default();
        let mut errors = Vec::new();
        for (info, dependencies) in extracted {
            if let Err(e) = graph.add(info, dependencies) {
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors }.into());
        }

        tracing::debug!("Built dependency graph with {} services", graph.len());
        Ok(graph)
    }

    async fn extract_parallel(
        components: &[Arc<dyn DynComponent>],
        services: Arc<ServiceSet>,
        pools: &WorkerPools,
    ) -> Result<Vec<(TypeInfo, BTreeSet<TypeInfo>)>, InitError> {
        let chunk_size = components.len().div_ceil(pools.size());
        tracing::debug!(
            "Extracting dependencies of {} components in chunks of {chunk_size}",
            components.len()
        );

        let tasks = components
            .chunks(chunk_size)
            .enumerate()
            .map(|(idx, chunk)| {
                let chunk = chunk.to_vec();
                let services = services.clone();
                Task::new(format!("dependency extraction chunk {idx}"), move || {
                    chunk
                        .iter()
                        .map(|component| {
                            (component.info(), extract(component.as_ref(), &services))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        let mut extracted = Vec::with_capacity(components.len());
        for result in pools.run_fixed(tasks).await? {
            extracted.extend(result?);
        }
        Ok(extracted)
    }

    pub fn add(
        &mut self,
        info: TypeInfo,
        dependencies: BTreeSet<TypeInfo>,
    ) -> Result<(), DependencyGraphError> {
        if let Some(existing) = self
            .map
            .insert(info.type_id, DependencyGraphEntry { info, dependencies })
        {
            return Err(DependencyGraphError::Duplicate(existing.info));
        }

        Ok(())
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.map.contains_key(&type_id)
    }

    /// Direct dependencies of a node, including ones outside the graph
    pub fn dependencies_of(&self, type_id: TypeId) -> Option<&BTreeSet<TypeInfo>> {
        self.map.get(&type_id).map(|entry| &entry.dependencies)
    }

    pub fn nodes(&self) -> impl Iterator<Item = TypeInfo> + '_ {
        self.map.values().map(|entry| entry.info)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Validate the graph
    ///
    /// Returns a list of all issues
    pub fn check(&self) -> Result<(), DependencyGraphErrors> {
        let mut checked = HashSet::new();
        let mut errors = Vec::new();
        for entry in self.map.values() {
            let mut dependency_chain = Vec::new();
            check_recurse(
                self,
                &mut checked,
                &mut errors,
                &mut dependency_chain,
                entry,
            );
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }

        return Ok(());

        fn check_recurse(
            graph: &DependencyGraph,
            checked: &mut HashSet<TypeId>,
            errors: &mut Vec<DependencyGraphError>,
            dependency_chain: &mut Vec<TypeInfo>,
            entry: &DependencyGraphEntry,
        ) {
            // Circular Dependency Check
            if let Some(start) = dependency_chain.iter().position(|info| *info == entry.info) {
                let mut chain = dependency_chain[start..].to_vec();
                let to = *chain.last().unwrap_or(&entry.info);
                chain.push(entry.info);

                errors.push(DependencyGraphError::CircularDependency {
                    from: entry.info,
                    to,
                    chain,
                });
                return;
            }

            // Skip other checks if already checked
            if !checked.insert(entry.info.type_id) {
                return;
            };

            dependency_chain.push(entry.info);

            for dependency in &entry.dependencies {
                // Edges leaving the graph end here
                let Some(next_entry) = graph.map.get(&dependency.type_id) else {
                    continue;
                };

                check_recurse(graph, checked, errors, dependency_chain, next_entry);
            }

            dependency_chain.pop();
        }
    }
}

#[derive(Debug, Clone)]
struct DependencyGraphEntry {
    info: TypeInfo,
    dependencies: BTreeSet<TypeInfo>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DependencyGraphError {
    #[error("A Type has been registered twice: '{0}'")]
    Duplicate(TypeInfo),
    #[error("A Circular Dependency exists between '{from}' and '{to}' through {} - Consider using `Lazy`", join_chain(.chain))]
    CircularDependency {
        from: TypeInfo,
        to: TypeInfo,
        chain: Vec<TypeInfo>,
    },
    #[error("No layer could be assigned to {remaining:?}")]
    UnresolvableLayers { remaining: Vec<TypeInfo> },
    #[error("Bean '{bean}' needs '{dependency}' but several provider methods produce it: {candidates:?}")]
    AmbiguousProducer {
        bean: String,
        dependency: TypeInfo,
        candidates: Vec<String>,
    },
    #[error("A Circular Dependency exists between provider methods: {}", .chain.join(" -> "))]
    BeanCycle { chain: Vec<String> },
}
impl std::fmt::Display for DependencyGraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("The dependency graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[derive(Error, Debug, Clone)]
pub struct DependencyGraphErrors {
    pub errors: Vec<DependencyGraphError>,
}
impl From<DependencyGraphError> for DependencyGraphErrors {
    fn from(error: DependencyGraphError) -> Self {
        DependencyGraphErrors {
            errors: vec![error],
        }
    }
}
