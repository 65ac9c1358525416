use std::{
    any::TypeId,
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use crate::{
    factories::{indexed_types, DynComponent},
    manifest::InjectionPoint,
    qualifier::{Qualified, Qualifier},
    types::TypeInfo,
};

/// What the graph needs to know about a discovered component
#[derive(Debug, Clone)]
pub struct ServiceSummary {
    pub info: TypeInfo,
    pub qualifier: Qualifier,
    /// Abstract types the service is registered under
    pub bindings: Vec<TypeInfo>,
}

/// All discovered components, the nodes of the service graph
#[derive(Debug, Default, Clone)]
pub struct ServiceSet {
    services: BTreeMap<TypeId, ServiceSummary>,
    implementors: HashMap<TypeId, Vec<TypeId>>,
}
impl ServiceSet {
    pub fn new(components: &[Arc<dyn DynComponent>]) -> Self {
        let mut set = ServiceSet::default();
        for component in components {
            let summary = ServiceSummary {
                info: component.info(),
                qualifier: component.qualifier().clone(),
                bindings: indexed_types(component.as_ref()),
            };
            for binding in &summary.bindings {
                set.implementors
                    .entry(binding.type_id)
                    .or_default()
                    .push(summary.info.type_id);
            }
            set.services.insert(summary.info.type_id, summary);
        }
        set
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.services.contains_key(&type_id)
    }

    pub fn get(&self, type_id: TypeId) -> Option<&ServiceSummary> {
        self.services.get(&type_id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Services bound to the abstract type `info`
    ///
    /// With a qualifier only services declaring exactly that qualifier match.
    pub fn implementors(&self, info: TypeInfo, qualifier: Option<&Qualifier>) -> Vec<TypeInfo> {
        let mut found = self
            .implementors
            .get(&info.type_id)
            .into_iter()
            .flatten()
            .filter_map(|type_id| self.services.get(type_id))
            .filter(|service| qualifier.map_or(true, |qualifier| &service.qualifier == qualifier))
            .map(|service| service.info)
            .collect::<Vec<_>>();
        found.sort();
        found
    }

    /// Service types an injection point resolves to
    ///
    /// Lazy points resolve after loading and never match. Composite points match every qualifier.
    pub fn matches(&self, point: &InjectionPoint) -> Vec<TypeInfo> {
        let dependency = point.info;
        if dependency.lazy {
            return Vec::new();
        }

        if !dependency.type_info.is_abstract {
            return match self.contains(dependency.type_info.type_id) {
                true => vec![dependency.type_info],
                false => Vec::new(),
            };
        }

        let qualifier = match dependency.composite {
            true => None,
            false => Some(point.qualifier()),
        };
        self.implementors(dependency.type_info, qualifier)
    }
}

/// Edges of a single component
///
/// Concrete dependencies are kept even if they are not services, they may be beans or pre-registered instances.
/// Abstract dependencies become edges to every matching service, none matching is fine here.
pub fn extract(component: &dyn DynComponent, services: &ServiceSet) -> BTreeSet<TypeInfo> {
    let mut edges = BTreeSet::new();
    for point in component.dependencies() {
        if point.info.lazy {
            continue;
        }

        if point.info.type_info.is_abstract {
            edges.extend(services.matches(&point));
        } else {
            edges.insert(point.info.type_info);
        }
    }
    edges
}
