pub mod templates;
pub mod writer;

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use hcl::{Block, Expression};
use regex::Regex;
use serde_json::Value;

use crate::hierarchy::{Hierarchy, HierarchyResolver};
use crate::registry::{ComponentMetadata, Registry, SECURITY_GROUP};
use crate::{Component, Connection, GeneratorSettings};
use writer::BlockBuilderExt;

pub const EMPTY_PLACEHOLDER: &str = "# Add components to the canvas to generate Terraform code";

// --- Template input ---

/// Address of another generated resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef<'a> {
    pub resource_type: &'a str,
    pub ident: &'a str,
}

impl BlockRef<'_> {
    /// `aws_subnet.app.id`-style reference.
    pub fn attr(&self, attribute: &str) -> String {
        format!("{}.{}.{}", self.resource_type, self.ident, attribute)
    }
}

/// Everything a template may look at. Templates are pure functions of this.
pub struct TemplateContext<'a> {
    pub component: &'a Component,
    pub metadata: &'a ComponentMetadata,
    pub ident: &'a str,
    pub display_name: String,
    pub region: &'a str,
    /// Effective container; for security groups, the VPC they were
    /// discovered in.
    pub parent: Option<BlockRef<'a>>,
    /// Every container the node is linked to, effective one last.
    pub containers: Vec<BlockRef<'a>>,
    pub security_groups: Vec<BlockRef<'a>>,
}

impl<'a> TemplateContext<'a> {
    /// Component attribute, falling back to the catalog default. `null`
    /// counts as unset.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.component
            .attributes
            .get(key)
            .filter(|v| !v.is_null())
            .or_else(|| self.metadata.default_attributes.get(key))
    }

    pub fn str_attr(&self, key: &str, fallback: &str) -> String {
        match self.value(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => fallback.to_string(),
        }
    }

    pub fn int_attr(&self, key: &str, fallback: i64) -> i64 {
        match self.value(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(fallback),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(fallback),
            _ => fallback,
        }
    }

    pub fn bool_attr(&self, key: &str, fallback: bool) -> bool {
        match self.value(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim() {
                "true" => true,
                "false" => false,
                _ => fallback,
            },
            _ => fallback,
        }
    }

    /// Accepts a JSON array or a comma separated string.
    pub fn int_list_attr(&self, key: &str) -> Vec<i64> {
        match self.value(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_i64().or_else(|| v.as_str()?.trim().parse().ok()))
                .collect(),
            Some(Value::String(s)) => s.split(',').filter_map(|p| p.trim().parse().ok()).collect(),
            Some(Value::Number(n)) => n.as_i64().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Copies of the resource to create; always 1 for types whose catalog
    /// entry has no `instances` default. Templates and outputs both read this.
    pub fn instance_count(&self) -> i64 {
        if !self.metadata.default_attributes.contains_key("instances") {
            return 1;
        }
        self.int_attr("instances", 1).max(1)
    }

    /// Ids of every linked container. For placed resources these are the
    /// subnets.
    pub fn subnet_ids(&self) -> Vec<Expression> {
        self.containers.iter().map(|c| writer::raw(c.attr("id"))).collect()
    }

    pub fn security_group_ids(&self) -> Vec<Expression> {
        self.security_groups
            .iter()
            .map(|sg| writer::raw(sg.attr("id")))
            .collect()
    }

    pub fn tags(&self) -> Expression {
        writer::object([("Name", writer::string(self.display_name.as_str()))])
    }
}

// --- Identifiers ---

/// Terraform-safe, unique local names keyed by component id.
#[derive(Debug, Default)]
pub struct Identifiers {
    by_id: HashMap<String, String>,
}

impl Identifiers {
    pub fn assign(hierarchy: &Hierarchy<'_>) -> Self {
        let mut by_id = HashMap::new();
        let mut taken: HashSet<String> = HashSet::new();
        for node in hierarchy.nodes() {
            let base = sanitize_identifier(&node.component.display_name());
            let mut ident = base.clone();
            let mut n = 2;
            while taken.contains(&ident) {
                ident = format!("{}_{}", base, n);
                n += 1;
            }
            taken.insert(ident.clone());
            by_id.insert(node.component.id.clone(), ident);
        }
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }
}

/// Lowercase, `[a-z0-9_]` only, never empty, never starting with a digit.
pub fn sanitize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return "resource".to_string();
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("r_{}", trimmed);
    }
    trimmed.to_string()
}

// --- Generator ---

pub struct Generator<'r> {
    registry: &'r Registry,
    settings: GeneratorSettings,
}

impl<'r> Generator<'r> {
    pub fn new(registry: &'r Registry, settings: GeneratorSettings) -> Self {
        Self { registry, settings }
    }

    /// Render the whole sketch. Never fails: unsupported components become
    /// comments, malformed ones are skipped.
    pub fn generate(&self, components: &[Component], connections: &[Connection]) -> String {
        if components.is_empty() {
            return EMPTY_PLACEHOLDER.to_string();
        }
        let hierarchy = HierarchyResolver::new(self.registry).resolve(components, connections);
        if hierarchy.is_empty() {
            return EMPTY_PLACEHOLDER.to_string();
        }
        let idents = Identifiers::assign(&hierarchy);

        let mut order: Vec<&Component> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for vpc in hierarchy.vpcs().into_iter().filter(|v| hierarchy.container_of(&v.id).is_none()) {
            walk(&hierarchy, vpc, &mut order, &mut seen);
        }
        for subnet in hierarchy.standalone_subnets() {
            walk(&hierarchy, subnet, &mut order, &mut seen);
        }
        for sg in hierarchy.security_groups() {
            walk(&hierarchy, sg, &mut order, &mut seen);
        }
        for root in hierarchy.roots() {
            walk(&hierarchy, root, &mut order, &mut seen);
        }

        let mut sections = vec![writer::render(self.header())];
        let mut outputs = Vec::new();
        for component in &order {
            let Some(ctx) = self.context(component, &hierarchy, &idents) else {
                sections.push(unsupported(component));
                continue;
            };
            let Some(template) = ctx.metadata.template else {
                sections.push(unsupported(component));
                continue;
            };
            sections.push(writer::render(template(&ctx)));
            outputs.extend(output_block(&ctx));
        }

        let variables: Vec<String> = referenced_variables(&sections[1..].join("\n"))
            .iter()
            .map(|name| writer::render(vec![self.variable_block(name)]))
            .collect();
        sections.extend(variables);
        sections.extend(outputs.into_iter().map(|block| writer::render(vec![block])));

        tracing::debug!(resources = order.len(), "terraform generated");
        let mut text = sections
            .iter()
            .map(|s| s.trim_end())
            .collect::<Vec<_>>()
            .join("\n\n");
        text.push('\n');
        text
    }

    fn header(&self) -> Vec<Block> {
        let terraform = Block::builder("terraform")
            .add_block(
                Block::builder("required_providers")
                    .add_attribute((
                        "aws",
                        writer::object([
                            ("source", writer::string("hashicorp/aws")),
                            ("version", writer::string(self.settings.provider_version.as_str())),
                        ]),
                    ))
                    .build(),
            )
            .build();
        let mut provider = writer::labelled("provider", "aws")
            .add_attribute(("region", writer::string(self.settings.region.as_str())));
        if !self.settings.default_tags.is_empty() {
            let tags = self
                .settings
                .default_tags
                .iter()
                .map(|(k, v)| (k, writer::string(v.as_str())));
            provider = provider.add_block(
                Block::builder("default_tags")
                    .add_attribute(("tags", writer::object(tags)))
                    .build(),
            );
        }
        vec![terraform, provider.build()]
    }

    fn block_ref<'a>(&self, component: &Component, idents: &'a Identifiers) -> Option<BlockRef<'a>> {
        let meta = self.registry.metadata(&component.node_type)?;
        Some(BlockRef {
            resource_type: meta.resource_type,
            ident: idents.get(&component.id)?,
        })
    }

    /// `None` for types the catalog does not know.
    fn context<'a>(
        &'a self,
        component: &'a Component,
        hierarchy: &Hierarchy<'_>,
        idents: &'a Identifiers,
    ) -> Option<TemplateContext<'a>> {
        let metadata = self.registry.metadata(&component.node_type)?;
        let ident = idents.get(&component.id)?;
        let parent = if component.node_type == SECURITY_GROUP {
            hierarchy.security_group_vpc(&component.id)
        } else {
            hierarchy.container_of(&component.id)
        };
        Some(TemplateContext {
            component,
            metadata,
            ident,
            display_name: component.display_name(),
            region: &self.settings.region,
            parent: parent.and_then(|p| self.block_ref(p, idents)),
            containers: hierarchy
                .containers_of(&component.id)
                .into_iter()
                .filter_map(|c| self.block_ref(c, idents))
                .collect(),
            security_groups: hierarchy
                .security_groups_of(&component.id)
                .into_iter()
                .filter_map(|c| self.block_ref(c, idents))
                .collect(),
        })
    }

    fn variable_block(&self, name: &str) -> Block {
        let block = writer::labelled("variable", name);
        let Some(spec) = self.registry.variable(name) else {
            return block.add_attribute(("type", writer::raw("string"))).build();
        };
        let mut block = block
            .add_attribute(("description", writer::string(spec.description)))
            .add_attribute(("type", writer::raw(spec.var_type)));
        if let Some(default) = spec.default {
            block = block.add_attribute(("default", writer::raw(default)));
        }
        block
            .add_attribute_if(spec.sensitive, "sensitive", writer::boolean(true))
            .build()
    }
}

fn unsupported(component: &Component) -> String {
    tracing::warn!(id = %component.id, node_type = %component.node_type, "no template for component type");
    format!("// Unsupported component type: {}", component.node_type)
}

fn output_block(ctx: &TemplateContext<'_>) -> Option<Block> {
    let spec = ctx.metadata.output.as_ref()?;
    let splat = if ctx.instance_count() > 1 { "[*]" } else { "" };
    let value = format!(
        "{}.{}{}.{}",
        ctx.metadata.resource_type, ctx.ident, splat, spec.attribute
    );
    Some(
        writer::labelled("output", &format!("{}_{}", ctx.ident, spec.name_suffix))
            .add_attribute(("description", writer::string(spec.description)))
            .add_attribute(("value", writer::raw(value)))
            .build(),
    )
}

/// Pre-order walk; a node is emitted once, under its effective container.
fn walk<'a>(
    hierarchy: &Hierarchy<'a>,
    component: &'a Component,
    order: &mut Vec<&'a Component>,
    seen: &mut HashSet<&'a str>,
) {
    if !seen.insert(component.id.as_str()) {
        return;
    }
    order.push(component);
    for child in hierarchy.children_of(&component.id) {
        walk(hierarchy, child, order, seen);
    }
}

static VARIABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9_.])var\.([A-Za-z_][A-Za-z0-9_-]*)")
        .expect("invalid variable reference regex")
});

/// `var.<name>` references, bare or inside `${...}`, in first occurrence
/// order.
pub fn referenced_variables(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in VARIABLE_REF.captures_iter(text) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
