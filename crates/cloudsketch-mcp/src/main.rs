use cloudsketch_core::registry::Registry;
use cloudsketch_core::rules::{PLACEMENT_CHECKLIST, RULES};
use cloudsketch_core::{
    read_settings, DependencyResolver, Generator, GeneratorSettings, Sketch, SketchError, Validator,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SketchRequest {
    /// The current sketch as a JSON string: {"components": [...], "connections": [...]}
    sketch: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AddComponentItem {
    /// Component type, e.g. "vpc", "subnet", "ec2", "securityGroup". See list_component_types.
    #[serde(rename = "type")]
    node_type: String,
    /// Display name. Also used for the Terraform identifier.
    name: Option<String>,
    /// X position on canvas. Default: auto-grid based on component count.
    x: Option<f64>,
    /// Y position on canvas. Default: auto-grid based on component count.
    y: Option<f64>,
    /// Attribute overrides merged over the type's defaults, e.g. {"cidr_block": "10.1.0.0/16"}
    attributes: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AddComponentsRequest {
    /// The current sketch as a JSON string. Use "{}" to start a new one.
    sketch: String,
    /// Components to add
    components: Vec<AddComponentItem>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct UpdateComponentRequest {
    /// The current sketch as a JSON string
    sketch: String,
    /// ID of the component to update
    id: String,
    /// Fields to merge into the component (name, x, y or any attribute). A null value removes the attribute. id and type cannot change.
    patch: Map<String, Value>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct IdsRequest {
    /// The current sketch as a JSON string
    sketch: String,
    /// IDs to remove
    ids: Vec<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ValidateConnectionRequest {
    /// The current sketch as a JSON string
    sketch: String,
    /// Source component ID
    from: String,
    /// Target component ID
    to: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ConnectItem {
    /// Source component ID
    from: String,
    /// Target component ID
    to: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ConnectRequest {
    /// The current sketch as a JSON string
    sketch: String,
    /// Edges to add, validated one at a time in order
    connections: Vec<ConnectItem>,
}

// --- Server ---

#[derive(Clone)]
pub struct CloudsketchServer {
    registry: &'static Registry,
    settings: GeneratorSettings,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CloudsketchServer {
    pub fn new(registry: &'static Registry, settings: GeneratorSettings) -> Self {
        Self {
            registry,
            settings,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "List every component type with its category, Terraform resource type, containment rules, allowed connections and default attributes"
    )]
    fn list_component_types(&self) -> Result<CallToolResult, McpError> {
        let categories: Vec<Value> = self
            .registry
            .categories()
            .into_iter()
            .map(|(category, types)| {
                let entries: Vec<Value> = types
                    .into_iter()
                    .filter_map(|t| self.registry.metadata(t))
                    .map(|m| {
                        json!({
                            "type": m.node_type,
                            "label": m.label,
                            "resourceType": m.resource_type,
                            "isContainer": m.is_container,
                            "canContain": m.can_contain,
                            "mustBeContainedBy": m.must_be_contained_by,
                            "canBeContainedBy": m.can_be_contained_by,
                            "spansMultipleContainers": m.spans_multiple_containers,
                            "allowedConnections": m.allowed_connections,
                            "defaultAttributes": m.default_attributes,
                        })
                    })
                    .collect();
                json!({ "category": category, "types": entries })
            })
            .collect();
        Ok(json_result(&categories))
    }

    #[tool(description = "Get the sketch modeling rules and recommended workflow")]
    fn get_rules(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(RULES)]))
    }

    #[tool(
        description = "Add one or more components to a sketch. Each starts from its type's default size and attributes. Returns the new IDs and the updated sketch."
    )]
    fn add_components(
        &self,
        Parameters(req): Parameters<AddComponentsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut sketch = match parse_sketch(&req.sketch) {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let mut added = Vec::new();
        for item in req.components {
            let slot = sketch.components.len();
            let (gx, gy) = grid_position(slot);
            let id = match sketch.add_component(
                self.registry,
                &item.node_type,
                item.x.unwrap_or(gx),
                item.y.unwrap_or(gy),
            ) {
                Ok(c) => c.id.clone(),
                Err(e) => return Ok(tool_error(e)),
            };

            let mut patch = item.attributes.unwrap_or_default();
            if let Some(name) = item.name {
                patch.insert("name".to_string(), Value::String(name));
            }
            if !patch.is_empty() {
                if let Err(e) = sketch.update_component(&id, patch) {
                    return Ok(tool_error(e));
                }
            }
            added.push(id);
        }
        Ok(sketch_result(
            format!("Added {} component(s): {}", added.len(), added.join(", ")),
            &sketch,
        ))
    }

    #[tool(description = "Update a component's name, position or attributes. Returns the updated sketch.")]
    fn update_component(
        &self,
        Parameters(req): Parameters<UpdateComponentRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut sketch = match parse_sketch(&req.sketch) {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        if let Err(e) = sketch.update_component(&req.id, req.patch) {
            return Ok(tool_error(e));
        }
        Ok(sketch_result(format!("Updated {}", req.id), &sketch))
    }

    #[tool(
        description = "Remove components and every connection that references them. Returns the updated sketch."
    )]
    fn remove_components(
        &self,
        Parameters(req): Parameters<IdsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut sketch = match parse_sketch(&req.sketch) {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let before = sketch.connections.len();
        let mut missing = Vec::new();
        for id in &req.ids {
            if sketch.remove_component(id).is_none() {
                missing.push(id.as_str());
            }
        }
        let mut summary = format!(
            "Removed {} component(s) and {} connection(s)",
            req.ids.len() - missing.len(),
            before - sketch.connections.len()
        );
        if !missing.is_empty() {
            summary.push_str(&format!(". Not found: {}", missing.join(", ")));
        }
        Ok(sketch_result(summary, &sketch))
    }

    #[tool(
        description = "Check whether an edge between two components would be accepted, and why. Does not modify the sketch."
    )]
    fn validate_connection(
        &self,
        Parameters(req): Parameters<ValidateConnectionRequest>,
    ) -> Result<CallToolResult, McpError> {
        let sketch = match parse_sketch(&req.sketch) {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let check = Validator::new(self.registry).validate_ids(
            &req.from,
            &req.to,
            &sketch.components,
            &sketch.connections,
        );
        Ok(json_result(&check))
    }

    #[tool(
        description = "Connect components. Each edge is validated against the sketch as it stands after the previous ones; rejected edges are skipped and reported. Returns the updated sketch."
    )]
    fn connect(&self, Parameters(req): Parameters<ConnectRequest>) -> Result<CallToolResult, McpError> {
        let mut sketch = match parse_sketch(&req.sketch) {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let mut lines = Vec::new();
        let mut committed = 0;
        for item in &req.connections {
            match sketch.connect(self.registry, &item.from, &item.to) {
                Ok(conn) => {
                    lines.push(format!("{} -> {}: connected ({})", item.from, item.to, conn.id));
                    committed += 1;
                }
                Err(SketchError::ConnectionRejected(reason)) => {
                    lines.push(format!("{} -> {}: rejected, {}", item.from, item.to, reason));
                }
                Err(e) => return Ok(tool_error(e)),
            }
        }
        if committed == 0 && !req.connections.is_empty() {
            return Ok(tool_error(lines.join("\n")));
        }
        Ok(sketch_result(lines.join("\n"), &sketch))
    }

    #[tool(description = "Remove connections by ID. Returns the updated sketch.")]
    fn disconnect(&self, Parameters(req): Parameters<IdsRequest>) -> Result<CallToolResult, McpError> {
        let mut sketch = match parse_sketch(&req.sketch) {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let removed = req
            .ids
            .iter()
            .filter(|id| sketch.disconnect(id).is_some())
            .count();
        Ok(sketch_result(format!("Removed {} connection(s)", removed), &sketch))
    }

    #[tool(
        description = "Infer the VPC > Subnet > Resource tree from the connections. Lists standalone components and resources that still need a container."
    )]
    fn resolve_hierarchy(
        &self,
        Parameters(req): Parameters<SketchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let sketch = match parse_sketch(&req.sketch) {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let hierarchy = sketch.hierarchy(self.registry);
        let unplaced: Vec<Value> = hierarchy
            .nodes()
            .filter(|n| n.parent.is_none())
            .filter(|n| PLACEMENT_CHECKLIST.contains(&n.component.node_type.as_str()))
            .map(|n| {
                let required: Vec<&str> = self
                    .registry
                    .metadata(&n.component.node_type)
                    .map(|m| m.must_be_contained_by.iter().map(|t| self.registry.label(t)).collect())
                    .unwrap_or_default();
                json!({
                    "id": n.component.id,
                    "name": n.component.display_name(),
                    "needs": required.join(" or "),
                })
            })
            .collect();

        let mut report = match serde_json::to_value(hierarchy.report()) {
            Ok(v) => v,
            Err(e) => return Ok(tool_error(e)),
        };
        report["unplaced"] = Value::Array(unplaced);
        Ok(json_result(&report))
    }

    #[tool(
        description = "List components in dependency order: containers and attached security groups before the resources that use them"
    )]
    fn get_emission_order(
        &self,
        Parameters(req): Parameters<SketchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let sketch = match parse_sketch(&req.sketch) {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let resolver = DependencyResolver::new(self.registry);
        let deps = resolver.build_dependency_map(&sketch.components, &sketch.connections);
        let order: Vec<Value> = resolver
            .emission_order(&sketch.components, &sketch.connections)
            .into_iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": c.node_type,
                    "name": c.display_name(),
                    "dependsOn": deps.get(&c.id).cloned().unwrap_or_default(),
                })
            })
            .collect();
        Ok(json_result(&order))
    }

    #[tool(
        description = "Generate Terraform for the sketch: provider header, resources in containment order, referenced variables and outputs"
    )]
    fn generate_terraform(
        &self,
        Parameters(req): Parameters<SketchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let sketch = match parse_sketch(&req.sketch) {
            Ok(s) => s,
            Err(e) => return Ok(e),
        };
        let text = Generator::new(self.registry, self.settings.clone())
            .generate(&sketch.components, &sketch.connections);
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool_handler]
impl ServerHandler for CloudsketchServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = format!("{}\n\n## Sketch Rules\n{}", INSTRUCTIONS, RULES);
        ServerInfo {
            instructions: Some(instructions.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// --- Helpers ---

fn tool_error(e: impl std::fmt::Display) -> CallToolResult {
    CallToolResult::error(vec![Content::text(e.to_string())])
}

fn parse_sketch(raw: &str) -> Result<Sketch, CallToolResult> {
    if raw.trim().is_empty() {
        return Ok(Sketch::new());
    }
    Sketch::from_json(raw).map_err(tool_error)
}

fn json_result<T: serde::Serialize + ?Sized>(value: &T) -> CallToolResult {
    match serde_json::to_string_pretty(value) {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(e) => tool_error(format!("Serialization error: {}", e)),
    }
}

/// Summary line plus the full updated sketch, which the caller passes back
/// on its next call.
fn sketch_result(summary: String, sketch: &Sketch) -> CallToolResult {
    match sketch.to_json() {
        Ok(json) => CallToolResult::success(vec![Content::text(summary), Content::text(json)]),
        Err(e) => tool_error(e),
    }
}

/// Canvas position for the n-th component when the caller gives none.
fn grid_position(n: usize) -> (f64, f64) {
    const COLUMNS: usize = 4;
    ((n % COLUMNS) as f64 * 220.0 + 40.0, (n / COLUMNS) as f64 * 180.0 + 40.0)
}

const INSTRUCTIONS: &str = r#"cloudsketch turns AWS architecture sketches into Terraform. A sketch is a JSON document with `components` (typed nodes such as vpc, subnet, ec2, rds, securityGroup) and `connections` (edges between component IDs).

## Stateless tools
The server stores nothing. Every tool takes the current sketch as a JSON string in its `sketch` argument, and tools that change it return a summary followed by the complete updated sketch. Always pass the latest returned sketch to the next call.

## Containment
Placement comes only from connections. Connecting a subnet to a VPC puts the subnet in the VPC; connecting an EC2 instance to that subnet puts the instance in the subnet. Security groups are attached to the resources they protect rather than contained."#;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // stdout carries the protocol.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

/// `cloudsketch-mcp generate <sketch.json>`: print Terraform and exit.
fn generate_file(path: &str, settings: GeneratorSettings) -> Result<(), Box<dyn std::error::Error>> {
    let sketch = Sketch::load(std::path::Path::new(path))?;
    let text = Generator::new(Registry::builtin(), settings).generate(&sketch.components, &sketch.connections);
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let settings = read_settings();

    let mut args = std::env::args().skip(1);
    if args.next().as_deref() == Some("generate") {
        let Some(path) = args.next() else {
            eprintln!("usage: cloudsketch-mcp generate <sketch.json>");
            std::process::exit(2);
        };
        return generate_file(&path, settings);
    }

    tracing::info!(region = %settings.region, "starting MCP server on stdio");
    let service = CloudsketchServer::new(Registry::builtin(), settings)
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| tracing::error!(error = %e, "MCP server error"))?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn server() -> CloudsketchServer {
        CloudsketchServer::new(Registry::builtin(), GeneratorSettings::default())
    }

    /// Text parts of a tool result and whether it was an error.
    fn texts(result: &CallToolResult) -> (Vec<String>, bool) {
        let value = serde_json::to_value(result).unwrap();
        let parts = value["content"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|c| c["text"].as_str().map(str::to_string))
            .collect();
        (parts, value["isError"].as_bool().unwrap_or(false))
    }

    fn updated_sketch(result: &CallToolResult) -> Sketch {
        let (parts, is_error) = texts(result);
        assert!(!is_error, "{parts:?}");
        Sketch::from_json(&parts[1]).unwrap()
    }

    fn add(server: &CloudsketchServer, sketch: &str, items: Value) -> Sketch {
        let req: AddComponentsRequest =
            serde_json::from_value(json!({ "sketch": sketch, "components": items })).unwrap();
        updated_sketch(&server.add_components(Parameters(req)).unwrap())
    }

    #[test]
    fn add_connect_and_generate() {
        let s = server();
        let sketch = add(
            &s,
            "{}",
            json!([
                { "type": "vpc", "name": "main" },
                { "type": "subnet", "name": "app", "attributes": { "cidr_block": "10.0.2.0/24" } },
                { "type": "ec2", "name": "web" }
            ]),
        );
        assert_eq!(sketch.components.len(), 3);
        assert_eq!(sketch.components[1].attributes["cidr_block"], json!("10.0.2.0/24"));
        assert_eq!((sketch.components[1].x, sketch.components[1].y), (260.0, 40.0));

        let ids: Vec<String> = sketch.components.iter().map(|c| c.id.clone()).collect();
        let req: ConnectRequest = serde_json::from_value(json!({
            "sketch": sketch.to_json().unwrap(),
            "connections": [
                { "from": ids[1], "to": ids[0] },
                { "from": ids[2], "to": ids[1] },
                { "from": ids[2], "to": ids[0] }
            ]
        }))
        .unwrap();
        let result = s.connect(Parameters(req)).unwrap();
        let (parts, _) = texts(&result);
        assert!(parts[0].contains("rejected"));
        let sketch = updated_sketch(&result);
        assert_eq!(sketch.connections.len(), 2);

        let req = SketchRequest {
            sketch: sketch.to_json().unwrap(),
        };
        let (parts, is_error) = texts(&s.generate_terraform(Parameters(req)).unwrap());
        assert!(!is_error);
        let flat: String = parts[0].chars().filter(|c| !c.is_whitespace()).collect();
        assert!(flat.contains("subnet_id=aws_subnet.app.id"));
    }

    #[test]
    fn unknown_types_are_tool_errors() {
        let req: AddComponentsRequest =
            serde_json::from_value(json!({ "sketch": "", "components": [{ "type": "mainframe" }] })).unwrap();
        let (parts, is_error) = texts(&server().add_components(Parameters(req)).unwrap());
        assert!(is_error);
        assert!(parts[0].contains("mainframe"));
    }

    #[test]
    fn invalid_sketch_json_is_a_tool_error() {
        let req = SketchRequest {
            sketch: "{not json".into(),
        };
        let (_, is_error) = texts(&server().resolve_hierarchy(Parameters(req)).unwrap());
        assert!(is_error);
    }

    #[test]
    fn hierarchy_reports_unplaced_resources() {
        let sketch = r#"{"components":[{"id":"e","type":"ec2","name":"web"},{"id":"b","type":"s3"}]}"#;
        let req = SketchRequest { sketch: sketch.into() };
        let (parts, _) = texts(&server().resolve_hierarchy(Parameters(req)).unwrap());
        let report: Value = serde_json::from_str(&parts[0]).unwrap();
        assert_eq!(report["unplaced"][0]["id"], json!("e"));
        assert_eq!(report["unplaced"][0]["needs"], json!("Subnet"));
        assert_eq!(report["unplaced"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn remove_cascades_and_reports_missing() {
        let sketch = r#"{"components":[{"id":"v","type":"vpc"},{"id":"s","type":"subnet"}],
                         "connections":[{"from":"s","to":"v"}]}"#;
        let req = IdsRequest {
            sketch: sketch.into(),
            ids: vec!["v".into(), "ghost".into()],
        };
        let result = server().remove_components(Parameters(req)).unwrap();
        let (parts, _) = texts(&result);
        assert_eq!(parts[0], "Removed 1 component(s) and 1 connection(s). Not found: ghost");
        assert!(updated_sketch(&result).connections.is_empty());
    }

    #[test]
    fn emission_order_lists_dependencies() {
        let sketch = r#"{"components":[{"id":"e","type":"ec2"},{"id":"s","type":"subnet"}],
                         "connections":[{"from":"e","to":"s"}]}"#;
        let req = SketchRequest { sketch: sketch.into() };
        let (parts, _) = texts(&server().get_emission_order(Parameters(req)).unwrap());
        let order: Value = serde_json::from_str(&parts[0]).unwrap();
        assert_eq!(order[0]["id"], json!("s"));
        assert_eq!(order[1]["dependsOn"], json!(["s"]));
    }
}
