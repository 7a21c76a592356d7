use std::collections::{HashMap, HashSet};

use crate::hierarchy::{Hierarchy, HierarchyResolver};
use crate::registry::Registry;
use crate::{Component, Connection};

/// Node id -> ids it must be emitted after.
pub type DependencyMap = HashMap<String, Vec<String>>;

pub struct DependencyResolver<'r> {
    registry: &'r Registry,
}

impl<'r> DependencyResolver<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    pub fn build_dependency_map(&self, components: &[Component], connections: &[Connection]) -> DependencyMap {
        let hierarchy = HierarchyResolver::new(self.registry).resolve(components, connections);
        dependency_map(&hierarchy)
    }

    /// Components in an order where every container and attached security
    /// group comes before the nodes that rely on it.
    pub fn emission_order<'a>(
        &self,
        components: &'a [Component],
        connections: &[Connection],
    ) -> Vec<&'a Component> {
        let deps = self.build_dependency_map(components, connections);
        topo_sort(components, &deps)
    }
}

/// A contained node depends on every container it is linked to; a node with a
/// security group attached depends on the group. Service-to-service edges are
/// expressed by reference in the output and add no ordering.
pub fn dependency_map(hierarchy: &Hierarchy<'_>) -> DependencyMap {
    let mut map = DependencyMap::new();
    for node in hierarchy.nodes() {
        let id = node.component.id.as_str();
        let mut deps: Vec<String> = Vec::new();
        for dep in hierarchy
            .containers_of(id)
            .into_iter()
            .chain(hierarchy.security_groups_of(id))
        {
            if !deps.iter().any(|d| d == &dep.id) {
                deps.push(dep.id.clone());
            }
        }
        map.insert(id.to_string(), deps);
    }
    map
}

/// Depth-first post-order over `components` (input order as tie-break).
/// Ids missing from `components` count as satisfied; a cycle is cut where it
/// is detected instead of recursing forever.
pub fn topo_sort<'a>(components: &'a [Component], dependencies: &DependencyMap) -> Vec<&'a Component> {
    let mut by_id: HashMap<&str, &'a Component> = HashMap::new();
    for c in components.iter().filter(|c| c.is_well_formed()) {
        by_id.entry(c.id.as_str()).or_insert(c);
    }

    let mut sorter = Sorter {
        by_id,
        dependencies,
        visited: HashSet::new(),
        on_path: HashSet::new(),
        order: Vec::with_capacity(components.len()),
    };
    for c in components {
        sorter.visit(&c.id);
    }
    sorter.order
}

struct Sorter<'a, 'd> {
    by_id: HashMap<&'a str, &'a Component>,
    dependencies: &'d DependencyMap,
    visited: HashSet<&'a str>,
    on_path: HashSet<&'a str>,
    order: Vec<&'a Component>,
}

impl<'a, 'd> Sorter<'a, 'd> {
    fn visit(&mut self, id: &str) {
        let Some(&component) = self.by_id.get(id) else {
            return;
        };
        let key = component.id.as_str();
        if self.visited.contains(key) {
            return;
        }
        if !self.on_path.insert(key) {
            tracing::warn!(id = key, "dependency cycle, emitting without waiting");
            return;
        }
        let dependencies = self.dependencies;
        if let Some(deps) = dependencies.get(key) {
            for dep in deps {
                self.visit(dep);
            }
        }
        self.on_path.remove(key);
        self.visited.insert(key);
        self.order.push(component);
    }
}
