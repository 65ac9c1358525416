use std::{
    any::TypeId,
    collections::{BTreeSet, HashSet},
};

use super::{DependencyGraph, DependencyGraphError};
use crate::types::TypeInfo;

impl DependencyGraph {
    /// Groups the graph into layers
    ///
    /// A node sits one layer above its deepest node dependency, nodes without node dependencies form layer 0.
    /// Dependencies outside the graph are ignored. Each layer is sorted by type name.
    pub fn layers(&self) -> Result<Vec<Vec<TypeInfo>>, DependencyGraphError> {
        let mut placed = HashSet::<TypeId>::new();
        let mut remaining = self.map.values().collect::<Vec<_>>();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (frontier, rest): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|entry| {
                    entry
                        .dependencies
                        .iter()
                        .filter(|dependency| self.map.contains_key(&dependency.type_id))
                        .all(|dependency| placed.contains(&dependency.type_id))
                });

            if frontier.is_empty() {
                let remaining = rest
                    .iter()
                    .map(|entry| entry.info)
                    .collect::<BTreeSet<_>>();
                return Err(DependencyGraphError::UnresolvableLayers {
                    remaining: remaining.into_iter().collect(),
                });
            }

            let mut layer = frontier.iter().map(|entry| entry.info).collect::<Vec<_>>();
            layer.sort_by_key(|info| info.type_name);

            tracing::trace!("Layer {}: {} nodes", layers.len(), layer.len());

            placed.extend(layer.iter().map(|info| info.type_id));
            layers.push(layer);
            remaining = rest;
        }

        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;
    struct C;
    struct D;
    struct External;

    fn info<T: 'static>() -> TypeInfo {
        TypeInfo::of::<T>()
    }

    #[test]
    fn layer_is_one_above_the_deepest_dependency() {
        // A -> B -> C, D -> C, C -> External
        let mut graph = DependencyGraph::default();
        graph.add(info::<A>(), [info::<B>()].into()).unwrap();
        graph.add(info::<B>(), [info::<C>()].into()).unwrap();
        graph.add(info::<C>(), [info::<External>()].into()).unwrap();
        graph.add(info::<D>(), [info::<C>()].into()).unwrap();

        let layers = graph.layers().unwrap();
        assert_eq!(
            layers,
            vec![
                vec![info::<C>()],
                vec![info::<B>(), info::<D>()],
                vec![info::<A>()]
            ]
        );
    }

    #[test]
    fn cycles_leave_unresolvable_nodes() {
        let mut graph = DependencyGraph::default();
        graph.add(info::<A>(), [info::<B>()].into()).unwrap();
        graph.add(info::<B>(), [info::<A>()].into()).unwrap();
        graph.add(info::<C>(), BTreeSet::new()).unwrap();

        let err = graph.layers().unwrap_err();
        assert!(
            matches!(err, DependencyGraphError::UnresolvableLayers { remaining } if remaining.len() == 2)
        );
    }
}
