use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::registry::{Registry, SECURITY_GROUP, SUBNET, VPC};
use crate::{Component, Connection};

#[derive(Debug, Clone)]
pub struct HierarchyNode<'a> {
    pub component: &'a Component,
    pub is_container: bool,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Containment forest derived from the edge list. Nodes are stored in an
/// arena in component input order; children keep that order too.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy<'a> {
    nodes: Vec<HierarchyNode<'a>>,
    index: HashMap<&'a str, usize>,
    /// Every container a node is linked to, in edge order. Only types that
    /// span containers have more than one.
    links: HashMap<usize, Vec<usize>>,
    /// Security group -> attached nodes, in edge order.
    attachments: HashMap<usize, Vec<usize>>,
}

pub struct HierarchyResolver<'r> {
    registry: &'r Registry,
}

impl<'r> HierarchyResolver<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Rebuild the forest from scratch. Malformed components and dangling
    /// edges are ignored. When a node is linked to two containers the last
    /// edge wins.
    pub fn resolve<'a>(&self, components: &'a [Component], connections: &[Connection]) -> Hierarchy<'a> {
        let mut h = Hierarchy::default();

        for component in components {
            if !component.is_well_formed() {
                tracing::debug!(id = %component.id, "skipping malformed component");
                continue;
            }
            if h.index.contains_key(component.id.as_str()) {
                tracing::debug!(id = %component.id, "skipping duplicate component id");
                continue;
            }
            let is_container = self
                .registry
                .metadata(&component.node_type)
                .map(|m| m.is_container)
                .unwrap_or(false);
            h.index.insert(component.id.as_str(), h.nodes.len());
            h.nodes.push(HierarchyNode {
                component,
                is_container,
                parent: None,
                children: Vec::new(),
            });
        }

        let sg_allows = self.registry.metadata(SECURITY_GROUP);

        for conn in connections {
            let (Some(&a), Some(&b)) = (h.index.get(conn.from.as_str()), h.index.get(conn.to.as_str()))
            else {
                tracing::debug!(connection = %conn.id, "ignoring dangling connection");
                continue;
            };
            if a == b {
                continue;
            }
            let (ta, tb) = (&h.nodes[a].component.node_type, &h.nodes[b].component.node_type);

            let nesting = if self.registry.can_nest(ta, tb) {
                Some((a, b))
            } else if self.registry.can_nest(tb, ta) {
                Some((b, a))
            } else {
                None
            };
            if let Some((child, container)) = nesting {
                let links = h.links.entry(child).or_default();
                if !links.contains(&container) {
                    links.push(container);
                }
                if let Some(previous) = h.nodes[child].parent {
                    if previous != container {
                        tracing::warn!(
                            node = %h.nodes[child].component.id,
                            previous = %h.nodes[previous].component.id,
                            container = %h.nodes[container].component.id,
                            "node linked to several containers, keeping the last"
                        );
                    }
                }
                h.nodes[child].parent = Some(container);
                continue;
            }

            let attachment = match (ta.as_str(), tb.as_str()) {
                (SECURITY_GROUP, other) if other != SECURITY_GROUP => Some((a, b)),
                (other, SECURITY_GROUP) if other != SECURITY_GROUP => Some((b, a)),
                _ => None,
            };
            if let Some((sg, node)) = attachment {
                let node_type = h.nodes[node].component.node_type.as_str();
                if sg_allows.is_some_and(|m| m.allows_connection_to(node_type)) {
                    let attached = h.attachments.entry(sg).or_default();
                    if !attached.contains(&node) {
                        attached.push(node);
                    }
                }
            }
        }

        h.break_cycles();
        for i in 0..h.nodes.len() {
            if let Some(p) = h.nodes[i].parent {
                h.nodes[p].children.push(i);
            }
        }
        h
    }
}

impl<'a> Hierarchy<'a> {
    /// Only a catalog with mutual containment can produce a loop; drop the
    /// parent link that closes it.
    fn break_cycles(&mut self) {
        for i in 0..self.nodes.len() {
            let mut seen = HashSet::new();
            let mut cur = self.nodes[i].parent;
            while let Some(p) = cur {
                if p == i {
                    tracing::warn!(node = %self.nodes[i].component.id, "containment cycle, detaching node");
                    self.nodes[i].parent = None;
                    if let Some(links) = self.links.get_mut(&i) {
                        links.clear();
                    }
                    break;
                }
                if !seen.insert(p) {
                    break;
                }
                cur = self.nodes[p].parent;
            }
        }
    }

    fn idx(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &HierarchyNode<'a>> {
        self.nodes.iter()
    }

    pub fn component(&self, id: &str) -> Option<&'a Component> {
        self.idx(id).map(|i| self.nodes[i].component)
    }

    pub fn container_of(&self, id: &str) -> Option<&'a Component> {
        let p = self.nodes[self.idx(id)?].parent?;
        Some(self.nodes[p].component)
    }

    /// All containers `id` is linked to, the effective one last.
    pub fn containers_of(&self, id: &str) -> Vec<&'a Component> {
        let Some(i) = self.idx(id) else {
            return Vec::new();
        };
        let mut out: Vec<&'a Component> = self
            .links
            .get(&i)
            .into_iter()
            .flatten()
            .filter(|&&c| Some(c) != self.nodes[i].parent)
            .map(|&c| self.nodes[c].component)
            .collect();
        if let Some(p) = self.nodes[i].parent {
            out.push(self.nodes[p].component);
        }
        out
    }

    pub fn children_of(&self, id: &str) -> Vec<&'a Component> {
        self.idx(id)
            .map(|i| {
                self.nodes[i]
                    .children
                    .iter()
                    .map(|&c| self.nodes[c].component)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nearest ancestor of the given type.
    pub fn ancestor_of_type(&self, id: &str, node_type: &str) -> Option<&'a Component> {
        let mut cur = self.nodes[self.idx(id)?].parent;
        let mut steps = 0;
        while let Some(p) = cur {
            if self.nodes[p].component.node_type == node_type {
                return Some(self.nodes[p].component);
            }
            steps += 1;
            if steps > self.nodes.len() {
                return None;
            }
            cur = self.nodes[p].parent;
        }
        None
    }

    pub fn roots(&self) -> impl Iterator<Item = &'a Component> + '_ {
        self.nodes.iter().filter(|n| n.parent.is_none()).map(|n| n.component)
    }

    fn of_type(&self, node_type: &'static str) -> impl Iterator<Item = &'a Component> + '_ {
        self.nodes
            .iter()
            .filter(move |n| n.component.node_type == node_type)
            .map(|n| n.component)
    }

    pub fn vpcs(&self) -> Vec<&'a Component> {
        self.of_type(VPC).collect()
    }

    pub fn subnets(&self) -> Vec<&'a Component> {
        self.of_type(SUBNET).collect()
    }

    pub fn security_groups(&self) -> Vec<&'a Component> {
        self.of_type(SECURITY_GROUP).collect()
    }

    pub fn standalone_subnets(&self) -> Vec<&'a Component> {
        self.nodes
            .iter()
            .filter(|n| n.parent.is_none() && n.component.node_type == SUBNET)
            .map(|n| n.component)
            .collect()
    }

    /// Uncontained nodes that are neither containers nor security groups,
    /// unknown types included.
    pub fn standalone_resources(&self) -> Vec<&'a Component> {
        self.nodes
            .iter()
            .filter(|n| {
                n.parent.is_none() && !n.is_container && n.component.node_type != SECURITY_GROUP
            })
            .map(|n| n.component)
            .collect()
    }

    /// Security groups attached to `id`, in component order.
    pub fn security_groups_of(&self, id: &str) -> Vec<&'a Component> {
        let Some(i) = self.idx(id) else {
            return Vec::new();
        };
        let mut out: Vec<(usize, usize)> = Vec::new();
        for (&sg, attached) in &self.attachments {
            if let Some(pos) = attached.iter().position(|&n| n == i) {
                out.push((sg, pos));
            }
        }
        out.sort();
        out.into_iter().map(|(sg, _)| self.nodes[sg].component).collect()
    }

    pub fn attached_to(&self, security_group_id: &str) -> Vec<&'a Component> {
        self.idx(security_group_id)
            .and_then(|i| self.attachments.get(&i))
            .map(|v| v.iter().map(|&n| self.nodes[n].component).collect())
            .unwrap_or_default()
    }

    /// The VPC a security group belongs to, discovered through the first
    /// attached node that sits inside one.
    pub fn security_group_vpc(&self, security_group_id: &str) -> Option<&'a Component> {
        self.attached_to(security_group_id)
            .into_iter()
            .find_map(|c| self.ancestor_of_type(&c.id, VPC))
    }

    pub fn report(&self) -> HierarchyReport {
        let ids = |v: Vec<&Component>| v.into_iter().map(|c| c.id.clone()).collect::<Vec<_>>();
        HierarchyReport {
            container_of: self
                .nodes
                .iter()
                .filter_map(|n| {
                    n.parent
                        .map(|p| (n.component.id.clone(), self.nodes[p].component.id.clone()))
                })
                .collect(),
            vpcs: ids(self.vpcs()),
            subnets: ids(self.subnets()),
            security_groups: ids(self.security_groups()),
            standalone_subnets: ids(self.standalone_subnets()),
            standalone_resources: ids(self.standalone_resources()),
            tree: self
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.parent.is_none())
                .map(|(i, _)| self.tree_entry(i))
                .collect(),
        }
    }

    fn tree_entry(&self, i: usize) -> TreeEntry {
        let node = &self.nodes[i];
        TreeEntry {
            id: node.component.id.clone(),
            node_type: node.component.node_type.clone(),
            name: node.component.display_name(),
            children: node.children.iter().map(|&c| self.tree_entry(c)).collect(),
        }
    }
}

/// Serialisable snapshot of a [`Hierarchy`] for callers outside the crate.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyReport {
    pub container_of: BTreeMap<String, String>,
    pub vpcs: Vec<String>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub standalone_subnets: Vec<String>,
    pub standalone_resources: Vec<String>,
    pub tree: Vec<TreeEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TreeEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EC2, RDS, S3};
    use pretty_assertions::assert_eq;

    fn resolve<'a>(components: &'a [Component], connections: &[Connection]) -> Hierarchy<'a> {
        HierarchyResolver::new(Registry::builtin()).resolve(components, connections)
    }

    fn ids(v: Vec<&Component>) -> Vec<&str> {
        v.into_iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn containment_is_inferred_from_type_pairs_in_either_direction() {
        let components = vec![
            Component::new("v", VPC),
            Component::new("s", SUBNET),
            Component::new("e", EC2),
        ];
        // Edge directions deliberately point "downwards".
        let connections = vec![Connection::new("v", "s"), Connection::new("s", "e")];
        let h = resolve(&components, &connections);

        assert_eq!(h.container_of("s").map(|c| c.id.as_str()), Some("v"));
        assert_eq!(h.container_of("e").map(|c| c.id.as_str()), Some("s"));
        assert_eq!(h.container_of("v"), None);
        assert_eq!(ids(h.children_of("v")), vec!["s"]);
        assert!(h.standalone_resources().is_empty());
        assert!(h.standalone_subnets().is_empty());
    }

    #[test]
    fn unrelated_edges_do_not_nest() {
        let components = vec![Component::new("e", EC2), Component::new("b", S3)];
        let connections = vec![Connection::new("e", "b")];
        let h = resolve(&components, &connections);
        assert_eq!(ids(h.standalone_resources()), vec!["e", "b"]);
    }

    #[test]
    fn dangling_and_malformed_input_is_ignored() {
        let components = vec![
            Component::new("s", SUBNET),
            Component::new("", EC2),
            Component::new("x", ""),
        ];
        let connections = vec![Connection::new("s", "gone"), Connection::new("", "s")];
        let h = resolve(&components, &connections);
        assert_eq!(h.nodes().count(), 1);
        assert_eq!(ids(h.standalone_subnets()), vec!["s"]);
    }

    #[test]
    fn multi_subnet_database_keeps_every_link() {
        let components = vec![
            Component::new("s1", SUBNET),
            Component::new("s2", SUBNET),
            Component::new("db", RDS),
        ];
        let connections = vec![Connection::new("db", "s1"), Connection::new("db", "s2")];
        let h = resolve(&components, &connections);
        assert_eq!(h.container_of("db").map(|c| c.id.as_str()), Some("s2"));
        assert_eq!(ids(h.containers_of("db")), vec!["s1", "s2"]);
        assert_eq!(ids(h.children_of("s2")), vec!["db"]);
        assert!(h.children_of("s1").is_empty());
    }

    #[test]
    fn security_groups_are_attached_not_contained() {
        let components = vec![
            Component::new("v", VPC),
            Component::new("s", SUBNET),
            Component::new("e", EC2),
            Component::new("sg", SECURITY_GROUP),
            Component::new("lonely", SECURITY_GROUP),
        ];
        let connections = vec![
            Connection::new("s", "v"),
            Connection::new("e", "s"),
            Connection::new("sg", "e"),
        ];
        let h = resolve(&components, &connections);
        assert_eq!(h.container_of("sg"), None);
        assert_eq!(ids(h.security_groups_of("e")), vec!["sg"]);
        assert_eq!(h.security_group_vpc("sg").map(|c| c.id.as_str()), Some("v"));
        assert_eq!(h.security_group_vpc("lonely"), None);
        assert!(!ids(h.standalone_resources()).contains(&"sg"));
    }

    #[test]
    fn report_lists_tree_and_maps() {
        let components = vec![
            Component::new("v", VPC),
            Component::new("s", SUBNET),
            Component::new("e", EC2).with_name("web"),
        ];
        let connections = vec![Connection::new("s", "v"), Connection::new("e", "s")];
        let report = resolve(&components, &connections).report();
        assert_eq!(report.container_of.get("e").map(String::as_str), Some("s"));
        assert_eq!(report.tree.len(), 1);
        assert_eq!(report.tree[0].children[0].children[0].name, "web");
    }
}
