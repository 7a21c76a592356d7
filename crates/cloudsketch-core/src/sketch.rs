use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codegen::Generator;
use crate::error::{Result, SketchError};
use crate::hierarchy::{Hierarchy, HierarchyResolver};
use crate::registry::Registry;
use crate::validator::Validator;
use crate::{make_connection_id, new_component_id, Component, Connection, GeneratorSettings};

/// The editable state the canvas works on. Every mutation keeps the two lists
/// consistent: no connection outlives either of its endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sketch {
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Sketch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut sketch: Sketch = serde_json::from_str(raw)?;
        for conn in &mut sketch.connections {
            if conn.id.is_empty() {
                conn.id = make_connection_id(&conn.from, &conn.to);
            }
        }
        Ok(sketch)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| SketchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    /// Place a new component of `node_type` with the catalog's default size
    /// and attributes.
    pub fn add_component(
        &mut self,
        registry: &Registry,
        node_type: &str,
        x: f64,
        y: f64,
    ) -> Result<&Component> {
        let meta = registry
            .metadata(node_type)
            .ok_or_else(|| SketchError::UnknownType(node_type.to_string()))?;
        let (width, height) = meta.default_size;
        let component = Component {
            id: new_component_id(node_type),
            node_type: node_type.to_string(),
            x,
            y,
            width,
            height,
            name: None,
            attributes: meta.default_attributes.clone(),
        };
        tracing::debug!(id = %component.id, node_type, "component added");
        self.components.push(component);
        Ok(&self.components[self.components.len() - 1])
    }

    /// Merge `patch` into a component. A `null` value removes the key.
    /// `id` and `type` are fixed at creation.
    pub fn update_component(&mut self, id: &str, patch: Map<String, Value>) -> Result<&Component> {
        let pos = self
            .components
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| SketchError::ComponentNotFound(id.to_string()))?;
        let current = &self.components[pos];

        for (field, existing) in [("id", &current.id), ("type", &current.node_type)] {
            if let Some(value) = patch.get(field) {
                if value.as_str() != Some(existing.as_str()) {
                    return Err(SketchError::ImmutableField(field.to_string()));
                }
            }
        }

        let mut merged = match serde_json::to_value(current)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            if value.is_null() {
                merged.remove(&key);
            } else {
                merged.insert(key, value);
            }
        }
        self.components[pos] = serde_json::from_value(Value::Object(merged))?;
        Ok(&self.components[pos])
    }

    /// Remove a component and every connection that references it.
    pub fn remove_component(&mut self, id: &str) -> Option<Component> {
        let pos = self.components.iter().position(|c| c.id == id)?;
        let removed = self.components.remove(pos);
        let before = self.connections.len();
        self.connections.retain(|conn| !conn.touches(id));
        tracing::debug!(
            id,
            dropped_connections = before - self.connections.len(),
            "component removed"
        );
        Some(removed)
    }

    /// Validate and, if accepted, commit an edge.
    pub fn connect(&mut self, registry: &Registry, from: &str, to: &str) -> Result<&Connection> {
        let check = Validator::new(registry).validate(
            self.component(from),
            self.component(to),
            &self.components,
            &self.connections,
        );
        if !check.valid {
            return Err(SketchError::ConnectionRejected(check.message));
        }
        self.connections.push(Connection::new(from, to));
        Ok(&self.connections[self.connections.len() - 1])
    }

    pub fn disconnect(&mut self, connection_id: &str) -> Option<Connection> {
        let pos = self.connections.iter().position(|c| c.id == connection_id)?;
        Some(self.connections.remove(pos))
    }

    pub fn hierarchy<'a>(&'a self, registry: &Registry) -> Hierarchy<'a> {
        HierarchyResolver::new(registry).resolve(&self.components, &self.connections)
    }

    pub fn terraform(&self, registry: &Registry, settings: &GeneratorSettings) -> String {
        Generator::new(registry, settings.clone()).generate(&self.components, &self.connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EC2, SUBNET, VPC};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn add_component_uses_catalog_defaults() {
        let mut sketch = Sketch::new();
        let vpc = sketch.add_component(Registry::builtin(), VPC, 5.0, 6.0).unwrap();
        assert_eq!(vpc.width, 600.0);
        assert_eq!(vpc.attributes["cidr_block"], json!("10.0.0.0/16"));
        assert!(vpc.id.starts_with("vpc-"));
    }

    #[test]
    fn add_component_rejects_unknown_type() {
        let mut sketch = Sketch::new();
        let err = sketch.add_component(Registry::builtin(), "mainframe", 0.0, 0.0);
        assert!(matches!(err, Err(SketchError::UnknownType(t)) if t == "mainframe"));
        assert!(sketch.components.is_empty());
    }

    #[test]
    fn remove_component_cascades_to_connections() {
        let registry = Registry::builtin();
        let mut sketch = Sketch::new();
        let vpc = sketch.add_component(registry, VPC, 0.0, 0.0).unwrap().id.clone();
        let subnet = sketch.add_component(registry, SUBNET, 0.0, 0.0).unwrap().id.clone();
        let ec2 = sketch.add_component(registry, EC2, 0.0, 0.0).unwrap().id.clone();
        sketch.connect(registry, &subnet, &vpc).unwrap();
        sketch.connect(registry, &ec2, &subnet).unwrap();

        sketch.remove_component(&subnet).unwrap();

        assert_eq!(sketch.components.len(), 2);
        assert!(sketch.connections.is_empty());
    }

    #[test]
    fn connect_refuses_rejected_edges() {
        let registry = Registry::builtin();
        let mut sketch = Sketch::new();
        let vpc = sketch.add_component(registry, VPC, 0.0, 0.0).unwrap().id.clone();
        let err = sketch.connect(registry, &vpc, &vpc).unwrap_err();
        assert!(matches!(err, SketchError::ConnectionRejected(_)));
        assert!(sketch.connections.is_empty());
    }

    #[test]
    fn update_component_merges_and_guards_identity() {
        let registry = Registry::builtin();
        let mut sketch = Sketch::new();
        let id = sketch.add_component(registry, EC2, 0.0, 0.0).unwrap().id.clone();

        let updated = sketch
            .update_component(
                &id,
                patch(json!({ "x": 40.0, "name": "web", "instance_type": "t3.small", "ami": null })),
            )
            .unwrap();
        assert_eq!(updated.x, 40.0);
        assert_eq!(updated.name.as_deref(), Some("web"));
        assert_eq!(updated.attributes["instance_type"], json!("t3.small"));
        assert!(!updated.attributes.contains_key("ami"));

        let err = sketch.update_component(&id, patch(json!({ "type": "rds" })));
        assert!(matches!(err, Err(SketchError::ImmutableField(f)) if f == "type"));
        let same = sketch.update_component(&id, patch(json!({ "type": "ec2" })));
        assert!(same.is_ok());
    }

    #[test]
    fn from_json_fills_missing_connection_ids() {
        let sketch = Sketch::from_json(
            r#"{"components":[{"id":"a","type":"vpc"},{"id":"b","type":"subnet"}],
                "connections":[{"from":"b","to":"a"}]}"#,
        )
        .unwrap();
        assert_eq!(sketch.connections[0].id, "edge-b-a");
    }

    #[test]
    fn disconnect_removes_only_that_edge() {
        let mut sketch = Sketch {
            components: vec![],
            connections: vec![Connection::new("a", "b"), Connection::new("b", "c")],
        };
        let gone = sketch.disconnect("edge-a-b").unwrap();
        assert_eq!(gone.from, "a");
        assert_eq!(sketch.connections.len(), 1);
        assert!(sketch.disconnect("edge-a-b").is_none());
    }
}
