//! Splits provider methods around the service layers
//!
//! Beans that need a service, directly or through another bean, can only be built after the services. All other
//! beans are built before them so services may depend on them.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    bean_graph::{BeanDependency, BeanGraph, BeanId},
    dependency_graph::ServiceSet,
};

/// When a bean is loaded relative to the service layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

/// Bean layers per phase, each layer sorted by id
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PhasePlan {
    pub before: Vec<Vec<BeanId>>,
    pub after: Vec<Vec<BeanId>>,
}
impl PhasePlan {
    pub fn layers(&self, phase: Phase) -> &[Vec<BeanId>] {
        match phase {
            Phase::Before => &self.before,
            Phase::After => &self.after,
        }
    }

    pub fn phase_of(&self, id: &BeanId) -> Option<Phase> {
        let contains = |layers: &[Vec<BeanId>]| layers.iter().any(|layer| layer.contains(id));
        if contains(&self.before) {
            Some(Phase::Before)
        } else if contains(&self.after) {
            Some(Phase::After)
        } else {
            None
        }
    }
}

/// Marks every bean depending on a service and groups the beans into phases
pub fn split(beans: &mut BeanGraph, services: &ServiceSet) -> PhasePlan {
    let mut memo = HashMap::new();
    for id in beans.ids() {
        depends_on_service(beans, services, &id, &mut memo, &mut HashSet::new());
    }

    let mut before = BTreeMap::<usize, Vec<BeanId>>::new();
    let mut after = BTreeMap::<usize, Vec<BeanId>>::new();
    for (id, depends) in memo {
        let Some(bean) = beans.get_mut(&id) else {
            continue;
        };
        bean.depends_on_service = depends;
        let phase = match depends {
            true => &mut after,
            false => &mut before,
        };
        phase.entry(bean.layer).or_default().push(id);
    }

    let collect = |layers: BTreeMap<usize, Vec<BeanId>>| {
        layers
            .into_values()
            .map(|mut layer| {
                layer.sort();
                layer
            })
            .collect::<Vec<_>>()
    };

    let plan = PhasePlan {
        before: collect(before),
        after: collect(after),
    };
    tracing::debug!(
        "Split provider methods into {} layers before and {} after the services",
        plan.before.len(),
        plan.after.len()
    );
    plan
}

fn depends_on_service(
    beans: &BeanGraph,
    services: &ServiceSet,
    id: &BeanId,
    memo: &mut HashMap<BeanId, bool>,
    visited: &mut HashSet<BeanId>,
) -> bool {
    if let Some(known) = memo.get(id) {
        return *known;
    }
    if !visited.insert(id.clone()) {
        return false;
    }

    let Some(bean) = beans.get(id) else {
        return false;
    };

    let direct = bean
        .method
        .params
        .iter()
        .any(|point| !services.matches(point).is_empty());

    let depends = direct
        || bean.dependencies.iter().any(|dependency| match dependency {
            BeanDependency::Bean(next) => depends_on_service(beans, services, next, memo, visited),
            BeanDependency::Type(_) => false,
        });

    memo.insert(id.clone(), depends);
    depends
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        configuration::{BeanMethod, Configuration, ConfigurationDescriptor, ConfigurationManifest},
        factories::{ComponentFactory, DynComponent},
        manifest::{Component, Manifest},
    };

    #[derive(Default)]
    struct Service;
    impl Component for Service {
        fn manifest() -> Manifest<Self> {
            Manifest::with_default()
        }
    }

    struct Plain;
    struct NeedsService;
    struct Downstream;

    #[derive(Default)]
    struct Beans;
    impl Configuration for Beans {
        fn manifest() -> ConfigurationManifest<Self> {
            ConfigurationManifest::with_default()
                .bean(BeanMethod::new("m1", |_: &Beans, _| Ok(Plain)))
                .bean(
                    BeanMethod::new("m2", |_: &Beans, _| Ok(NeedsService))
                        .param::<Arc<Service>>("service"),
                )
                .bean(
                    BeanMethod::new("m3", |_: &Beans, _| Ok(Downstream))
                        .param::<Arc<NeedsService>>("upstream"),
                )
        }
    }

    fn id(name: &str) -> BeanId {
        let descriptor = ConfigurationDescriptor::of::<Beans>();
        let method = descriptor
            .methods
            .iter()
            .find(|method| method.name == name)
            .unwrap();
        BeanId::of(method)
    }

    #[test]
    fn service_dependencies_move_beans_after_the_services() {
        let components: Vec<Arc<dyn DynComponent>> = vec![ComponentFactory::<Service>::descriptor()];
        let services = ServiceSet::new(&components);
        let mut beans =
            BeanGraph::build(&[Arc::new(ConfigurationDescriptor::of::<Beans>())]).unwrap();

        let plan = split(&mut beans, &services);

        assert_eq!(plan.phase_of(&id("m1")), Some(Phase::Before));
        assert_eq!(plan.phase_of(&id("m2")), Some(Phase::After));
        // Transitively through m2
        assert_eq!(plan.phase_of(&id("m3")), Some(Phase::After));
        assert_eq!(plan.after, vec![vec![id("m2")], vec![id("m3")]]);
        assert!(beans.get(&id("m3")).unwrap().depends_on_service);
    }

    #[test]
    fn without_services_everything_loads_before() {
        let mut beans =
            BeanGraph::build(&[Arc::new(ConfigurationDescriptor::of::<Beans>())]).unwrap();

        let plan = split(&mut beans, &ServiceSet::default());
        assert!(plan.after.is_empty());
        assert_eq!(plan.before.iter().flatten().count(), 3);
    }
}
