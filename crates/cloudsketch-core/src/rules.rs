/// Sketch modeling rules. Served by the MCP `get_rules` tool and embedded in
/// the server instructions.
pub const RULES: &str = "\
1. Containment is expressed by edges, not coordinates. A subnet is inside a VPC because there is an \
edge between them; dropping it visually inside the VPC box means nothing on its own. Edge direction \
does not matter for containment.\n\
2. VPC > Subnet > Resource. A subnet belongs to exactly one VPC. EC2 instances, load balancers, RDS \
databases and ElastiCache clusters must sit in a subnet, never directly in a VPC. Lambda functions may \
optionally be placed in a subnet.\n\
3. One container per resource. An EC2 instance, subnet or cache cluster is linked to a single container. \
The exception is an RDS database, which may be linked to several subnets to form a multi-AZ subnet group.\n\
4. Security groups are attached, not contained. Connect a security group to the EC2 instances, RDS \
databases, ElastiCache clusters or load balancers it protects. It cannot be attached to a VPC, subnet or \
Lambda function. Its VPC is inferred from the resources it protects.\n\
5. One edge per pair. Do not add a second edge between the same two components in the opposite \
direction, and never connect a component to itself.\n\
6. Service edges are references. An edge such as EC2 -> S3 or Lambda -> DynamoDB documents that the \
services talk to each other. It adds no ordering to the generated Terraform and grants no IAM \
permissions by itself.\n\
7. Names become identifiers. Component names are turned into Terraform identifiers (lowercased, \
non-alphanumerics replaced with `_`, duplicates suffixed with `_2`, `_3`). Give components short, \
role-based names (\"web\", \"orders-db\") rather than technology lists.\n\
8. Secrets stay out of the sketch. Database credentials, SSH key names and IAM role ARNs are emitted as \
Terraform variables (`var.db_password`, `var.ssh_key_name`, `var.lambda_role_arn`). Never put secrets in \
component attributes.\n\
\n\
## Workflow\n\
1. `list_component_types` to see the catalog: categories, containment rules and default attributes.\n\
2. Build the sketch with `add_components`, then place resources with `connect`. Every tool takes the \
current sketch JSON and returns the updated one; keep passing the latest copy.\n\
3. Before connecting, `validate_connection` explains why an edge would be rejected. `connect` runs the \
same check and refuses rejected edges.\n\
4. `resolve_hierarchy` shows the inferred VPC > Subnet > Resource tree and the standalone components. \
Anything listed as standalone that should be placed is missing an edge.\n\
5. `get_emission_order` lists components in the order Terraform blocks depend on each other.\n\
6. `generate_terraform` renders the sketch. Review the variables section: every listed variable must be \
supplied at apply time unless it has a default.";

/// Types whose placement is mandatory, in the order they should be checked
/// when reviewing a sketch.
pub const PLACEMENT_CHECKLIST: &[&str] = &[
    crate::registry::SUBNET,
    crate::registry::EC2,
    crate::registry::LOAD_BALANCER,
    crate::registry::RDS,
    crate::registry::ELASTICACHE,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn checklist_matches_mandatory_containment() {
        let registry = Registry::builtin();
        for node_type in PLACEMENT_CHECKLIST {
            let meta = registry.metadata(node_type).expect("catalog entry");
            assert!(!meta.must_be_contained_by.is_empty(), "{node_type} has no required container");
        }
        let mandatory = registry.types().filter(|m| !m.must_be_contained_by.is_empty()).count();
        assert_eq!(mandatory, PLACEMENT_CHECKLIST.len());
    }

    #[test]
    fn rules_mention_every_tool() {
        for tool in [
            "list_component_types",
            "add_components",
            "connect",
            "validate_connection",
            "resolve_hierarchy",
            "get_emission_order",
            "generate_terraform",
        ] {
            assert!(RULES.contains(tool), "{tool} missing from rules");
        }
    }
}
