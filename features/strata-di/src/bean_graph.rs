//! Graph of provider methods
//!
//! Every provider method of every configuration is a node. A parameter becomes an edge to the method producing it,
//! or stays a plain type dependency if no method does.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::Arc,
};

use crate::{
    configuration::{ConfigurationDescriptor, ProviderMethod},
    dependency_graph::{DependencyGraphError, DependencyGraphErrors},
    manifest::InjectionPoint,
    types::TypeInfo,
};

/// Unique id of a provider method: `{configuration}::{method}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeanId(Arc<str>);
impl BeanId {
    pub fn of(method: &ProviderMethod) -> Self {
        BeanId(Arc::from(method.id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for BeanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeanDependency {
    /// Produced by another provider method
    Bean(BeanId),
    /// Produced by nobody in the bean graph
    Type(TypeInfo),
}

#[derive(Debug, Clone)]
pub struct BeanDescriptor {
    pub id: BeanId,
    pub method: ProviderMethod,
    pub dependencies: Vec<BeanDependency>,
    pub layer: usize,
    /// Set by the phase splitter
    pub depends_on_service: bool,
}

#[derive(Debug, Default, Clone)]
pub struct BeanGraph {
    beans: BTreeMap<BeanId, BeanDescriptor>,
}

impl BeanGraph {
    /// Builds the graph over all provider methods, then checks it for cycles and assigns layers
    pub fn build(configurations: &[Arc<ConfigurationDescriptor>]) -> Result<Self, DependencyGraphErrors> {
        let methods = configurations
            .iter()
            .flat_map(|configuration| configuration.methods.iter())
            .collect::<Vec<_>>();

        let mut graph = BeanGraph::default();
        let mut errors = Vec::new();

        for method in &methods {
            let id = BeanId::of(method);
            let mut dependencies = Vec::new();

            for point in &method.params {
                match producers_of(point, &methods) {
                    Ok(producers) if producers.is_empty() => {
                        if !point.info.lazy {
                            dependencies.push(BeanDependency::Type(point.info.type_info));
                        }
                    }
                    Ok(producers) => dependencies.extend(producers.into_iter().map(BeanDependency::Bean)),
                    Err(candidates) => errors.push(DependencyGraphError::AmbiguousProducer {
                        bean: id.to_string(),
                        dependency: point.info.type_info,
                        candidates,
                    }),
                }
            }

            let descriptor = BeanDescriptor {
                id: id.clone(),
                method: (*method).clone(),
                dependencies,
                layer: 0,
                depends_on_service: false,
            };
            if graph.beans.insert(id, descriptor).is_some() {
                errors.push(DependencyGraphError::Duplicate(method.owner));
            }
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }

        graph.check()?;
        graph.assign_layers();

        tracing::debug!("Built bean graph with {} provider methods", graph.len());
        Ok(graph)
    }

    pub fn get(&self, id: &BeanId) -> Option<&BeanDescriptor> {
        self.beans.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &BeanId) -> Option<&mut BeanDescriptor> {
        self.beans.get_mut(id)
    }

    pub fn beans(&self) -> impl Iterator<Item = &BeanDescriptor> {
        self.beans.values()
    }

    pub fn ids(&self) -> Vec<BeanId> {
        self.beans.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.beans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }

    /// Reports every cycle between provider methods
    pub fn check(&self) -> Result<(), DependencyGraphErrors> {
        let mut checked = HashSet::new();
        let mut errors = Vec::new();
        for id in self.beans.keys() {
            self.check_recurse(id, &mut checked, &mut Vec::new(), &mut errors);
        }

        match errors.is_empty() {
            true => Ok(()),
            false => Err(DependencyGraphErrors { errors }),
        }
    }

    fn check_recurse<'a>(
        &'a self,
        id: &'a BeanId,
        checked: &mut HashSet<&'a BeanId>,
        chain: &mut Vec<&'a BeanId>,
        errors: &mut Vec<DependencyGraphError>,
    ) {
        if let Some(start) = chain.iter().position(|existing| *existing == id) {
            let mut cycle = chain[start..]
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>();
            cycle.push(id.to_string());
            errors.push(DependencyGraphError::BeanCycle { chain: cycle });
            return;
        }

        if !checked.insert(id) {
            return;
        }

        let Some(bean) = self.beans.get(id) else {
            return;
        };

        chain.push(id);
        for dependency in &bean.dependencies {
            if let BeanDependency::Bean(next) = dependency {
                self.check_recurse(next, checked, chain, errors);
            }
        }
        chain.pop();
    }

    /// Layer of a bean is one above its deepest bean dependency
    fn assign_layers(&mut self) {
        let mut layers = BTreeMap::new();
        for id in self.beans.keys() {
            self.layer_of(id, &mut layers, &mut HashSet::new());
        }

        for (id, layer) in layers {
            if let Some(bean) = self.beans.get_mut(&id) {
                bean.layer = layer;
            }
        }
    }

    fn layer_of(
        &self,
        id: &BeanId,
        layers: &mut BTreeMap<BeanId, usize>,
        visiting: &mut HashSet<BeanId>,
    ) -> usize {
        if let Some(layer) = layers.get(id) {
            return *layer;
        }
        // Only reachable with a cycle, which check() already reported
        if !visiting.insert(id.clone()) {
            return 0;
        }

        let layer = self
            .beans
            .get(id)
            .into_iter()
            .flat_map(|bean| bean.dependencies.iter())
            .filter_map(|dependency| match dependency {
                BeanDependency::Bean(next) => Some(self.layer_of(next, layers, visiting) + 1),
                BeanDependency::Type(_) => None,
            })
            .max()
            .unwrap_or(0);

        visiting.remove(id);
        layers.insert(id.clone(), layer);
        layer
    }
}

/// Provider methods producing the value of `point`
///
/// Exact producers of the type win over producers binding it. Only producers with the point's qualifier count,
/// composite points take all of them. Several candidates for a single value are returned as the error.
fn producers_of(
    point: &InjectionPoint,
    methods: &[&ProviderMethod],
) -> Result<Vec<BeanId>, Vec<String>> {
    let wanted = point.info.type_info;
    let qualifier_matches =
        |method: &&&ProviderMethod| point.info.composite || method.qualifier == point.qualifier;

    let exact = methods
        .iter()
        .filter(|method| method.produces == wanted)
        .filter(qualifier_matches)
        .collect::<Vec<_>>();

    let candidates = match exact.is_empty() {
        false => exact,
        true => methods
            .iter()
            .filter(|method| method.bindings.iter().any(|binding| binding.info == wanted))
            .filter(qualifier_matches)
            .collect(),
    };

    if candidates.len() > 1 && !point.info.composite {
        let mut ids = candidates.iter().map(|method| method.id()).collect::<Vec<_>>();
        ids.sort();
        return Err(ids);
    }

    Ok(candidates.into_iter().map(|method| BeanId::of(method)).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        configuration::{BeanMethod, Configuration, ConfigurationManifest},
        resolver::composite::All,
    };

    struct Url(&'static str);
    struct Pool;
    struct Cache;

    #[derive(Default)]
    struct Storage;
    impl Configuration for Storage {
        fn manifest() -> ConfigurationManifest<Self> {
            ConfigurationManifest::with_default()
                .bean(BeanMethod::new("url", |_: &Storage, _| Ok(Url("db://"))))
                .bean(
                    BeanMethod::new("pool", |_: &Storage, args| {
                        let _url = args.take::<Arc<Url>>()?;
                        Ok(Pool)
                    })
                    .param::<Arc<Url>>("url"),
                )
                .bean(
                    BeanMethod::new("cache", |_: &Storage, _| Ok(Cache))
                        .param::<Arc<Pool>>("pool")
                        .param::<Arc<String>>("name"),
                )
        }
    }

    fn id(name: &str) -> BeanId {
        BeanId(Arc::from(format!("{}::{name}", std::any::type_name::<Storage>())))
    }

    #[test]
    fn layers_follow_producer_chains() {
        let graph = BeanGraph::build(&[Arc::new(ConfigurationDescriptor::of::<Storage>())]).unwrap();

        assert_eq!(graph.get(&id("url")).unwrap().layer, 0);
        assert_eq!(graph.get(&id("pool")).unwrap().layer, 1);

        let cache = graph.get(&id("cache")).unwrap();
        assert_eq!(cache.layer, 2);
        assert_eq!(
            cache.dependencies,
            vec![
                BeanDependency::Bean(id("pool")),
                BeanDependency::Type(TypeInfo::of::<String>())
            ]
        );
    }

    #[derive(Default)]
    struct Mirrors;
    impl Configuration for Mirrors {
        fn manifest() -> ConfigurationManifest<Self> {
            ConfigurationManifest::with_default()
                .bean(BeanMethod::new("primary", |_: &Mirrors, _| Ok(Url("a"))))
                .bean(BeanMethod::new("secondary", |_: &Mirrors, _| Ok(Url("b"))))
                .bean(
                    BeanMethod::new("pool", |_: &Mirrors, _| Ok(Pool)).param::<Arc<Url>>("url"),
                )
                .bean(BeanMethod::new("all", |_: &Mirrors, _| Ok(Cache)).param::<All<Url>>("urls"))
        }
    }

    #[test]
    fn several_producers_of_one_value_are_ambiguous() {
        let errors =
            BeanGraph::build(&[Arc::new(ConfigurationDescriptor::of::<Mirrors>())]).unwrap_err();

        assert_eq!(errors.errors.len(), 1);
        assert!(matches!(
            &errors.errors[0],
            DependencyGraphError::AmbiguousProducer { candidates, .. } if candidates.len() == 2
        ));
    }

    #[derive(Default)]
    struct Loop;
    impl Configuration for Loop {
        fn manifest() -> ConfigurationManifest<Self> {
            ConfigurationManifest::with_default()
                .bean(BeanMethod::new("url", |_: &Loop, _| Ok(Url("x"))).param::<Arc<Pool>>("pool"))
                .bean(BeanMethod::new("pool", |_: &Loop, _| Ok(Pool)).param::<Arc<Url>>("url"))
        }
    }

    #[test]
    fn provider_cycles_are_reported() {
        let errors = BeanGraph::build(&[Arc::new(ConfigurationDescriptor::of::<Loop>())]).unwrap_err();
        assert!(errors
            .errors
            .iter()
            .all(|error| matches!(error, DependencyGraphError::BeanCycle { chain } if chain.len() == 3)));
    }
}
