pub mod codegen;
pub mod dependency;
pub mod error;
pub mod hierarchy;
pub mod registry;
pub mod rules;
pub mod sketch;
pub mod validator;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use codegen::Generator;
pub use dependency::{topo_sort, DependencyResolver};
pub use error::{Result, SketchError};
pub use hierarchy::{Hierarchy, HierarchyReport, HierarchyResolver};
pub use registry::{Category, ComponentMetadata, Registry};
pub use sketch::Sketch;
pub use validator::{ConnectionCheck, Validator};

// --- Types ---

/// A node on the canvas. Type-specific attributes (`cidr_block`,
/// `instance_type`, ...) are flattened into the same JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Component {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// `name` if set, otherwise `TYPE-<last 4 chars of id>`.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let tail = self
                    .id
                    .char_indices()
                    .rev()
                    .nth(3)
                    .map(|(i, _)| &self.id[i..])
                    .unwrap_or(&self.id);
                format!("{}-{}", self.node_type.to_uppercase(), tail)
            }
        }
    }

    /// Components without an id or a type cannot be classified and are skipped.
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty() && !self.node_type.is_empty()
    }
}

/// An edge between two components. Stored directionally, interpreted by the
/// types of its endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct Connection {
    /// Edge id. Generated as `edge-{from}-{to}` when omitted.
    #[serde(default)]
    pub id: String,
    /// Component id the edge starts at
    pub from: String,
    /// Component id the edge ends at
    pub to: String,
}

impl Connection {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: make_connection_id(&from, &to),
            from,
            to,
        }
    }

    pub fn touches(&self, id: &str) -> bool {
        self.from == id || self.to == id
    }

    /// The endpoint opposite to `id`, if `id` is one of the endpoints.
    pub fn other_end(&self, id: &str) -> Option<&str> {
        if self.from == id {
            Some(&self.to)
        } else if self.to == id {
            Some(&self.from)
        } else {
            None
        }
    }

    /// Same unordered pair.
    pub fn joins(&self, a: &str, b: &str) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }
}

/// Generate an edge ID from source and target component IDs.
pub fn make_connection_id(from: &str, to: &str) -> String {
    format!("edge-{}-{}", from, to)
}

/// Generate a fresh component ID. Never reused, even after deletion.
pub fn new_component_id(node_type: &str) -> String {
    format!("{}-{}", node_type, uuid::Uuid::new_v4().simple())
}

// --- Entry points (builtin catalog) ---

pub fn validate_connection(
    source: Option<&Component>,
    target: Option<&Component>,
    components: &[Component],
    connections: &[Connection],
) -> ConnectionCheck {
    Validator::new(Registry::builtin()).validate(source, target, components, connections)
}

pub fn resolve_hierarchy<'a>(
    components: &'a [Component],
    connections: &[Connection],
) -> Hierarchy<'a> {
    HierarchyResolver::new(Registry::builtin()).resolve(components, connections)
}

pub fn generate_infrastructure_code(components: &[Component], connections: &[Connection]) -> String {
    Generator::new(Registry::builtin(), GeneratorSettings::default())
        .generate(components, connections)
}

// --- Settings ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorSettings {
    pub region: String,
    pub provider_version: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub default_tags: BTreeMap<String, String>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            provider_version: "~> 5.0".to_string(),
            default_tags: BTreeMap::new(),
        }
    }
}

/// Resolve the global config directory (~/.cloudsketch/).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cloudsketch")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// Settings from ~/.cloudsketch/settings.json; `CLOUDSKETCH_REGION` wins over
/// the file's region.
pub fn read_settings() -> GeneratorSettings {
    let mut settings = read_settings_from(&settings_path());
    if let Ok(region) = std::env::var("CLOUDSKETCH_REGION") {
        if !region.trim().is_empty() {
            settings.region = region.trim().to_string();
        }
    }
    settings
}

/// Missing or unreadable files fall back to defaults.
pub fn read_settings_from(path: &Path) -> GeneratorSettings {
    if !path.exists() {
        return GeneratorSettings::default();
    }
    match fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
    {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
            GeneratorSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn display_name_falls_back_to_type_and_id_tail() {
        let c = Component::new("ec2-9f3a1b7c", "ec2");
        assert_eq!(c.display_name(), "EC2-1b7c");
        assert_eq!(c.clone().with_name("web").display_name(), "web");
        assert_eq!(c.with_name("   ").display_name(), "EC2-1b7c");
        assert_eq!(Component::new("ab", "s3").display_name(), "S3-ab");
    }

    #[test]
    fn component_attributes_are_flattened() {
        let c: Component = serde_json::from_value(json!({
            "id": "vpc-1",
            "type": "vpc",
            "x": 10,
            "y": 20,
            "width": 600,
            "height": 400,
            "cidr_block": "10.0.0.0/16"
        }))
        .unwrap();
        assert_eq!(c.node_type, "vpc");
        assert_eq!(c.attributes["cidr_block"], json!("10.0.0.0/16"));
        assert!(!c.attributes.contains_key("id"));

        let back = serde_json::to_value(&c).unwrap();
        assert_eq!(back["cidr_block"], json!("10.0.0.0/16"));
        assert_eq!(back["type"], json!("vpc"));
    }

    #[test]
    fn connection_helpers() {
        let e = Connection::new("a", "b");
        assert_eq!(e.id, "edge-a-b");
        assert!(e.joins("b", "a"));
        assert_eq!(e.other_end("b"), Some("a"));
        assert_eq!(e.other_end("c"), None);
    }

    #[test]
    fn component_ids_are_unique() {
        let a = new_component_id("ec2");
        let b = new_component_id("ec2");
        assert!(a.starts_with("ec2-"));
        assert_ne!(a, b);
    }
}
