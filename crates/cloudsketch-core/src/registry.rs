use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::codegen::{templates, TemplateContext};

// --- Well-known types ---

pub const VPC: &str = "vpc";
pub const SUBNET: &str = "subnet";
pub const SECURITY_GROUP: &str = "securityGroup";
pub const EC2: &str = "ec2";
pub const LAMBDA: &str = "lambda";
pub const S3: &str = "s3";
pub const RDS: &str = "rds";
pub const DYNAMODB: &str = "dynamodb";
pub const ELASTICACHE: &str = "elasticache";
pub const LOAD_BALANCER: &str = "loadBalancer";
pub const SQS: &str = "sqs";
pub const SNS: &str = "sns";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Networking,
    Security,
    Compute,
    Storage,
    Database,
    Integration,
}

/// Renders one component as Terraform. Must not panic on odd attributes.
pub type TemplateFn = fn(&TemplateContext<'_>) -> Vec<hcl::Block>;

/// The single output block a component type contributes, e.g. an EC2 public IP.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name_suffix: &'static str,
    pub attribute: &'static str,
    pub description: &'static str,
}

/// A Terraform input variable that templates may reference as `var.<name>`.
#[derive(Debug, Clone, Serialize)]
pub struct VariableSpec {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub var_type: &'static str,
    /// HCL literal, emitted verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
    pub sensitive: bool,
}

#[derive(Debug, Clone)]
pub struct ComponentMetadata {
    pub node_type: &'static str,
    pub label: &'static str,
    pub category: Category,
    /// Terraform resource type of the primary block, e.g. `aws_instance`.
    pub resource_type: &'static str,
    pub allowed_connections: BTreeSet<&'static str>,
    pub is_container: bool,
    pub can_contain: BTreeSet<&'static str>,
    pub must_be_contained_by: BTreeSet<&'static str>,
    pub can_be_contained_by: BTreeSet<&'static str>,
    /// May be linked to several containers at once (multi-AZ databases).
    pub spans_multiple_containers: bool,
    pub default_size: (f64, f64),
    pub default_attributes: Map<String, Value>,
    pub template: Option<TemplateFn>,
    pub output: Option<OutputSpec>,
}

impl ComponentMetadata {
    pub fn new(
        node_type: &'static str,
        label: &'static str,
        category: Category,
        resource_type: &'static str,
    ) -> Self {
        Self {
            node_type,
            label,
            category,
            resource_type,
            allowed_connections: BTreeSet::new(),
            is_container: false,
            can_contain: BTreeSet::new(),
            must_be_contained_by: BTreeSet::new(),
            can_be_contained_by: BTreeSet::new(),
            spans_multiple_containers: false,
            default_size: (120.0, 80.0),
            default_attributes: Map::new(),
            template: None,
            output: None,
        }
    }

    pub fn allows(mut self, types: &[&'static str]) -> Self {
        self.allowed_connections.extend(types.iter().copied());
        self
    }

    pub fn container_of(mut self, types: &[&'static str]) -> Self {
        self.is_container = true;
        self.can_contain.extend(types.iter().copied());
        self
    }

    /// Mandatory containment also counts as permitted containment.
    pub fn must_be_in(mut self, types: &[&'static str]) -> Self {
        self.must_be_contained_by.extend(types.iter().copied());
        self.can_be_contained_by.extend(types.iter().copied());
        self
    }

    pub fn can_be_in(mut self, types: &[&'static str]) -> Self {
        self.can_be_contained_by.extend(types.iter().copied());
        self
    }

    pub fn spanning(mut self) -> Self {
        self.spans_multiple_containers = true;
        self
    }

    pub fn size(mut self, width: f64, height: f64) -> Self {
        self.default_size = (width, height);
        self
    }

    pub fn defaults(mut self, attributes: Value) -> Self {
        if let Value::Object(map) = attributes {
            self.default_attributes = map;
        }
        self
    }

    pub fn template(mut self, template: TemplateFn) -> Self {
        self.template = Some(template);
        self
    }

    pub fn output(
        mut self,
        name_suffix: &'static str,
        attribute: &'static str,
        description: &'static str,
    ) -> Self {
        self.output = Some(OutputSpec {
            name_suffix,
            attribute,
            description,
        });
        self
    }

    pub fn allows_connection_to(&self, other: &str) -> bool {
        self.allowed_connections.contains(other)
    }
}

// --- Registry ---

/// Read-only catalog of component types. Every legality decision and every
/// template traces back to an entry here.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<&'static str, ComponentMetadata>,
    order: Vec<&'static str>,
    variables: HashMap<&'static str, VariableSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide AWS catalog, built on first use.
    pub fn builtin() -> &'static Registry {
        static BUILTIN: OnceLock<Registry> = OnceLock::new();
        BUILTIN.get_or_init(Registry::aws)
    }

    pub fn register(&mut self, metadata: ComponentMetadata) {
        if !self.entries.contains_key(metadata.node_type) {
            self.order.push(metadata.node_type);
        }
        self.entries.insert(metadata.node_type, metadata);
    }

    pub fn register_variable(&mut self, spec: VariableSpec) {
        self.variables.insert(spec.name, spec);
    }

    pub fn metadata(&self, node_type: &str) -> Option<&ComponentMetadata> {
        self.entries.get(node_type)
    }

    pub fn default_attributes(&self, node_type: &str) -> Map<String, Value> {
        self.metadata(node_type)
            .map(|m| m.default_attributes.clone())
            .unwrap_or_default()
    }

    /// Types grouped by palette category, each group in registration order.
    pub fn categories(&self) -> BTreeMap<Category, Vec<&'static str>> {
        let mut out: BTreeMap<Category, Vec<&'static str>> = BTreeMap::new();
        for meta in self.types() {
            out.entry(meta.category).or_default().push(meta.node_type);
        }
        out
    }

    pub fn types(&self) -> impl Iterator<Item = &ComponentMetadata> {
        self.order.iter().filter_map(|t| self.entries.get(t))
    }

    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.get(name)
    }

    pub fn label<'a>(&'a self, node_type: &'a str) -> &'a str {
        self.metadata(node_type).map(|m| m.label).unwrap_or(node_type)
    }

    /// Whether a `child` typed node may live inside a `container` typed node.
    /// Both sides of the catalog have to agree.
    pub fn can_nest(&self, child: &str, container: &str) -> bool {
        let (Some(child_meta), Some(container_meta)) =
            (self.metadata(child), self.metadata(container))
        else {
            return false;
        };
        container_meta.is_container
            && container_meta.can_contain.contains(child)
            && child_meta.can_be_contained_by.contains(container)
    }

    pub fn aws() -> Self {
        let mut r = Registry::new();

        r.register(
            ComponentMetadata::new(VPC, "VPC", Category::Networking, "aws_vpc")
                .container_of(&[SUBNET])
                .allows(&[SUBNET])
                .size(600.0, 400.0)
                .defaults(json!({ "cidr_block": "10.0.0.0/16", "enable_dns_hostnames": true }))
                .template(templates::vpc)
                .output("id", "id", "ID of the VPC"),
        );
        r.register(
            ComponentMetadata::new(SUBNET, "Subnet", Category::Networking, "aws_subnet")
                .container_of(&[EC2, LAMBDA, RDS, ELASTICACHE, LOAD_BALANCER])
                .must_be_in(&[VPC])
                .allows(&[VPC, EC2, LAMBDA, RDS, ELASTICACHE, LOAD_BALANCER])
                .size(300.0, 200.0)
                .defaults(json!({
                    "cidr_block": "10.0.1.0/24",
                    "public": false
                }))
                .template(templates::subnet),
        );
        r.register(
            ComponentMetadata::new(
                SECURITY_GROUP,
                "Security Group",
                Category::Security,
                "aws_security_group",
            )
            .allows(&[EC2, RDS, ELASTICACHE, LOAD_BALANCER])
            .defaults(json!({
                "description": "Managed by cloudsketch",
                "ingress_ports": [22, 80, 443]
            }))
            .template(templates::security_group),
        );
        r.register(
            ComponentMetadata::new(EC2, "EC2 instance", Category::Compute, "aws_instance")
                .must_be_in(&[SUBNET])
                .allows(&[
                    SUBNET,
                    SECURITY_GROUP,
                    RDS,
                    S3,
                    DYNAMODB,
                    ELASTICACHE,
                    SQS,
                    SNS,
                    LOAD_BALANCER,
                    LAMBDA,
                ])
                .defaults(json!({
                    "ami": "ami-0c55b159cbfafe1f0",
                    "instance_type": "t2.micro",
                    "instances": 1
                }))
                .template(templates::ec2)
                .output("public_ip", "public_ip", "Public IP of the EC2 instance"),
        );
        r.register(
            ComponentMetadata::new(LAMBDA, "Lambda function", Category::Compute, "aws_lambda_function")
                .can_be_in(&[SUBNET])
                .allows(&[SUBNET, S3, DYNAMODB, RDS, SQS, SNS, ELASTICACHE])
                .defaults(json!({
                    "runtime": "nodejs18.x",
                    "handler": "index.handler",
                    "filename": "lambda.zip",
                    "memory_size": 128,
                    "timeout": 30
                }))
                .template(templates::lambda),
        );
        r.register(
            ComponentMetadata::new(S3, "S3 bucket", Category::Storage, "aws_s3_bucket")
                .allows(&[EC2, LAMBDA])
                .defaults(json!({ "versioning": false }))
                .template(templates::s3)
                .output("bucket_name", "bucket", "Name of the S3 bucket"),
        );
        r.register(
            ComponentMetadata::new(RDS, "RDS database", Category::Database, "aws_db_instance")
                .must_be_in(&[SUBNET])
                .spanning()
                .allows(&[SUBNET, SECURITY_GROUP])
                .defaults(json!({
                    "engine": "mysql",
                    "engine_version": "8.0",
                    "instance_class": "db.t3.micro",
                    "allocated_storage": 20
                }))
                .template(templates::rds)
                .output("endpoint", "endpoint", "Connection endpoint of the RDS database"),
        );
        r.register(
            ComponentMetadata::new(DYNAMODB, "DynamoDB table", Category::Database, "aws_dynamodb_table")
                .allows(&[EC2, LAMBDA])
                .defaults(json!({ "billing_mode": "PAY_PER_REQUEST", "hash_key": "id" }))
                .template(templates::dynamodb),
        );
        r.register(
            ComponentMetadata::new(
                ELASTICACHE,
                "ElastiCache cluster",
                Category::Database,
                "aws_elasticache_cluster",
            )
            .must_be_in(&[SUBNET])
            .allows(&[SUBNET, SECURITY_GROUP])
            .defaults(json!({
                "engine": "redis",
                "node_type": "cache.t3.micro",
                "num_cache_nodes": 1
            }))
            .template(templates::elasticache),
        );
        r.register(
            ComponentMetadata::new(LOAD_BALANCER, "load balancer", Category::Networking, "aws_lb")
                .must_be_in(&[SUBNET])
                .allows(&[SUBNET, SECURITY_GROUP, EC2, LAMBDA])
                .defaults(json!({ "load_balancer_type": "application", "internal": false }))
                .template(templates::load_balancer)
                .output("dns_name", "dns_name", "DNS name of the load balancer"),
        );
        r.register(
            ComponentMetadata::new(SQS, "SQS queue", Category::Integration, "aws_sqs_queue")
                .allows(&[LAMBDA, EC2, SNS])
                .defaults(json!({ "visibility_timeout_seconds": 30, "fifo": false }))
                .template(templates::sqs),
        );
        r.register(
            ComponentMetadata::new(SNS, "SNS topic", Category::Integration, "aws_sns_topic")
                .allows(&[LAMBDA, EC2, SQS])
                .template(templates::sns),
        );

        r.register_variable(VariableSpec {
            name: "ssh_key_name",
            description: "Name of the EC2 key pair used for SSH access",
            var_type: "string",
            default: Some("null"),
            sensitive: false,
        });
        r.register_variable(VariableSpec {
            name: "db_username",
            description: "Master username for RDS databases",
            var_type: "string",
            default: Some("\"admin\""),
            sensitive: false,
        });
        r.register_variable(VariableSpec {
            name: "db_password",
            description: "Master password for RDS databases",
            var_type: "string",
            default: None,
            sensitive: true,
        });
        r.register_variable(VariableSpec {
            name: "lambda_role_arn",
            description: "IAM role assumed by Lambda functions",
            var_type: "string",
            default: None,
            sensitive: false,
        });
        r.register_variable(VariableSpec {
            name: "vpc_id",
            description: "Existing VPC for subnets that are not placed in a sketched VPC",
            var_type: "string",
            default: None,
            sensitive: false,
        });

        r
    }
}
