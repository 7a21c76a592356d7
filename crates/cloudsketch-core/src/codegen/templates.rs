//! Per-type Terraform templates. Each is a pure function of its
//! [`TemplateContext`] and returns the blocks for one component.

use hcl::structure::BlockBuilder;
use hcl::Block;

use super::writer::{self, boolean, list, number, raw, string, BlockBuilderExt};
use super::TemplateContext;

fn tagged(block: BlockBuilder, ctx: &TemplateContext<'_>) -> Block {
    block.add_attribute(("tags", ctx.tags())).build()
}

fn add_list_if_any(block: BlockBuilder, key: &str, items: Vec<hcl::Expression>) -> BlockBuilder {
    if items.is_empty() {
        block
    } else {
        block.add_attribute((key, list(items)))
    }
}

/// AWS resource names: lowercase letters, digits and hyphens.
fn resource_name(ctx: &TemplateContext<'_>, max_len: usize) -> String {
    let mut out = String::new();
    for c in ctx.display_name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let mut name: String = out.trim_matches('-').chars().take(max_len).collect();
    while name.ends_with('-') {
        name.pop();
    }
    if name.is_empty() {
        ctx.ident.replace('_', "-")
    } else {
        name
    }
}

fn open_egress() -> Block {
    Block::builder("egress")
        .add_attribute(("from_port", number(0)))
        .add_attribute(("to_port", number(0)))
        .add_attribute(("protocol", string("-1")))
        .add_attribute(("cidr_blocks", list([string("0.0.0.0/0")])))
        .build()
}

pub fn vpc(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let block = writer::resource("aws_vpc", ctx.ident)
        .add_attribute(("cidr_block", string(ctx.str_attr("cidr_block", "10.0.0.0/16"))))
        .add_attribute((
            "enable_dns_hostnames",
            boolean(ctx.bool_attr("enable_dns_hostnames", true)),
        ))
        .add_attribute(("enable_dns_support", boolean(true)));
    vec![tagged(block, ctx)]
}

pub fn subnet(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let vpc_id = match ctx.parent {
        Some(vpc) => vpc.attr("id"),
        None => "var.vpc_id".to_string(),
    };
    let zone = ctx.str_attr("availability_zone", &format!("{}a", ctx.region));
    let block = writer::resource("aws_subnet", ctx.ident)
        .add_attribute(("vpc_id", raw(vpc_id)))
        .add_attribute(("cidr_block", string(ctx.str_attr("cidr_block", "10.0.1.0/24"))))
        .add_attribute(("availability_zone", string(zone)))
        .add_attribute_if(
            ctx.bool_attr("public", false),
            "map_public_ip_on_launch",
            boolean(true),
        );
    vec![tagged(block, ctx)]
}

pub fn security_group(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let mut block = writer::resource("aws_security_group", ctx.ident)
        .add_attribute(("name", string(resource_name(ctx, 255))))
        .add_attribute((
            "description",
            string(ctx.str_attr("description", "Managed by cloudsketch")),
        ));
    if let Some(vpc) = ctx.parent {
        block = block.add_attribute(("vpc_id", raw(vpc.attr("id"))));
    }
    for port in ctx.int_list_attr("ingress_ports") {
        block = block.add_block(
            Block::builder("ingress")
                .add_attribute(("from_port", number(port)))
                .add_attribute(("to_port", number(port)))
                .add_attribute(("protocol", string("tcp")))
                .add_attribute(("cidr_blocks", list([string("0.0.0.0/0")])))
                .build(),
        );
    }
    vec![tagged(block.add_block(open_egress()), ctx)]
}

pub fn ec2(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let count = ctx.instance_count();
    let mut block = writer::resource("aws_instance", ctx.ident)
        .add_attribute_if(count > 1, "count", number(count))
        .add_attribute(("ami", string(ctx.str_attr("ami", "ami-0c55b159cbfafe1f0"))))
        .add_attribute(("instance_type", string(ctx.str_attr("instance_type", "t2.micro"))));
    if let Some(subnet) = ctx.parent {
        block = block.add_attribute(("subnet_id", raw(subnet.attr("id"))));
    }
    block = add_list_if_any(block, "vpc_security_group_ids", ctx.security_group_ids())
        .add_attribute(("key_name", raw("var.ssh_key_name")));

    if count > 1 {
        let name = raw(format!("\"{}-${{count.index + 1}}\"", resource_name(ctx, 240)));
        vec![block.add_attribute(("tags", writer::object([("Name", name)]))).build()]
    } else {
        vec![tagged(block, ctx)]
    }
}

pub fn lambda(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let mut block = writer::resource("aws_lambda_function", ctx.ident)
        .add_attribute(("function_name", string(resource_name(ctx, 64))))
        .add_attribute(("filename", string(ctx.str_attr("filename", "lambda.zip"))))
        .add_attribute(("handler", string(ctx.str_attr("handler", "index.handler"))))
        .add_attribute(("runtime", string(ctx.str_attr("runtime", "nodejs18.x"))))
        .add_attribute(("memory_size", number(ctx.int_attr("memory_size", 128))))
        .add_attribute(("timeout", number(ctx.int_attr("timeout", 30))))
        .add_attribute(("role", raw("var.lambda_role_arn")));
    let subnets = ctx.subnet_ids();
    if !subnets.is_empty() {
        block = block.add_block(
            Block::builder("vpc_config")
                .add_attribute(("subnet_ids", list(subnets)))
                .add_attribute(("security_group_ids", list(ctx.security_group_ids())))
                .build(),
        );
    }
    vec![tagged(block, ctx)]
}

pub fn s3(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let bucket_name = ctx.str_attr("bucket_name", &resource_name(ctx, 63));
    let bucket = writer::resource("aws_s3_bucket", ctx.ident)
        .add_attribute(("bucket", string(bucket_name)));
    let mut blocks = vec![tagged(bucket, ctx)];
    if ctx.bool_attr("versioning", false) {
        blocks.push(
            writer::resource("aws_s3_bucket_versioning", ctx.ident)
                .add_attribute(("bucket", raw(format!("aws_s3_bucket.{}.id", ctx.ident))))
                .add_block(
                    Block::builder("versioning_configuration")
                        .add_attribute(("status", string("Enabled")))
                        .build(),
                )
                .build(),
        );
    }
    blocks
}

pub fn rds(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let subnets = ctx.subnet_ids();
    let spans_subnets = subnets.len() > 1;
    let mut blocks = Vec::new();
    if !subnets.is_empty() {
        blocks.push(
            writer::resource("aws_db_subnet_group", ctx.ident)
                .add_attribute(("name", string(format!("{}-subnets", resource_name(ctx, 200)))))
                .add_attribute(("subnet_ids", list(subnets.clone())))
                .build(),
        );
    }

    let mut block = writer::resource("aws_db_instance", ctx.ident)
        .add_attribute(("identifier", string(resource_name(ctx, 63))))
        .add_attribute(("engine", string(ctx.str_attr("engine", "mysql"))))
        .add_attribute(("engine_version", string(ctx.str_attr("engine_version", "8.0"))))
        .add_attribute(("instance_class", string(ctx.str_attr("instance_class", "db.t3.micro"))))
        .add_attribute(("allocated_storage", number(ctx.int_attr("allocated_storage", 20))))
        .add_attribute(("username", raw("var.db_username")))
        .add_attribute(("password", raw("var.db_password")))
        .add_attribute(("skip_final_snapshot", boolean(true)));
    if !subnets.is_empty() {
        block = block.add_attribute((
            "db_subnet_group_name",
            raw(format!("aws_db_subnet_group.{}.name", ctx.ident)),
        ));
    }
    block = block.add_attribute_if(spans_subnets, "multi_az", boolean(true));
    block = add_list_if_any(block, "vpc_security_group_ids", ctx.security_group_ids());
    blocks.push(tagged(block, ctx));
    blocks
}

pub fn dynamodb(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let billing = ctx.str_attr("billing_mode", "PAY_PER_REQUEST");
    let hash_key = ctx.str_attr("hash_key", "id");
    let provisioned = billing == "PROVISIONED";
    let block = writer::resource("aws_dynamodb_table", ctx.ident)
        .add_attribute(("name", string(resource_name(ctx, 255))))
        .add_attribute(("billing_mode", string(billing)))
        .add_attribute(("hash_key", string(hash_key.clone())))
        .add_attribute_if(provisioned, "read_capacity", number(ctx.int_attr("read_capacity", 5)))
        .add_attribute_if(provisioned, "write_capacity", number(ctx.int_attr("write_capacity", 5)))
        .add_block(
            Block::builder("attribute")
                .add_attribute(("name", string(hash_key)))
                .add_attribute(("type", string("S")))
                .build(),
        );
    vec![tagged(block, ctx)]
}

pub fn elasticache(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let engine = ctx.str_attr("engine", "redis");
    let default_port = if engine == "memcached" { 11211 } else { 6379 };
    let subnets = ctx.subnet_ids();
    let mut blocks = Vec::new();
    if !subnets.is_empty() {
        blocks.push(
            writer::resource("aws_elasticache_subnet_group", ctx.ident)
                .add_attribute(("name", string(format!("{}-subnets", resource_name(ctx, 200)))))
                .add_attribute(("subnet_ids", list(subnets.clone())))
                .build(),
        );
    }

    let mut block = writer::resource("aws_elasticache_cluster", ctx.ident)
        .add_attribute(("cluster_id", string(resource_name(ctx, 50))))
        .add_attribute(("engine", string(engine)))
        .add_attribute(("node_type", string(ctx.str_attr("node_type", "cache.t3.micro"))))
        .add_attribute(("num_cache_nodes", number(ctx.int_attr("num_cache_nodes", 1))))
        .add_attribute(("port", number(ctx.int_attr("port", default_port))));
    if !subnets.is_empty() {
        block = block.add_attribute((
            "subnet_group_name",
            raw(format!("aws_elasticache_subnet_group.{}.name", ctx.ident)),
        ));
    }
    block = add_list_if_any(block, "security_group_ids", ctx.security_group_ids());
    blocks.push(tagged(block, ctx));
    blocks
}

pub fn load_balancer(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let mut block = writer::resource("aws_lb", ctx.ident)
        .add_attribute(("name", string(resource_name(ctx, 32))))
        .add_attribute(("internal", boolean(ctx.bool_attr("internal", false))))
        .add_attribute((
            "load_balancer_type",
            string(ctx.str_attr("load_balancer_type", "application")),
        ));
    block = add_list_if_any(block, "subnets", ctx.subnet_ids());
    block = add_list_if_any(block, "security_groups", ctx.security_group_ids());
    vec![tagged(block, ctx)]
}

pub fn sqs(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let fifo = ctx.bool_attr("fifo", false);
    let mut name = resource_name(ctx, 75);
    if fifo {
        if let Some(stem) = name.strip_suffix("-fifo") {
            name = stem.to_string();
        }
        name.push_str(".fifo");
    }
    let block = writer::resource("aws_sqs_queue", ctx.ident)
        .add_attribute(("name", string(name)))
        .add_attribute((
            "visibility_timeout_seconds",
            number(ctx.int_attr("visibility_timeout_seconds", 30)),
        ))
        .add_attribute_if(fifo, "fifo_queue", boolean(true));
    vec![tagged(block, ctx)]
}

pub fn sns(ctx: &TemplateContext<'_>) -> Vec<Block> {
    let block = writer::resource("aws_sns_topic", ctx.ident)
        .add_attribute(("name", string(resource_name(ctx, 256))));
    vec![tagged(block, ctx)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::writer::{render, squash};
    use crate::codegen::BlockRef;
    use crate::registry::{Registry, DYNAMODB, EC2, RDS, S3, SNS, SQS, SUBNET};
    use crate::Component;
    use serde_json::json;

    fn ctx<'a>(component: &'a Component, ident: &'a str) -> TemplateContext<'a> {
        TemplateContext {
            component,
            metadata: Registry::builtin()
                .metadata(&component.node_type)
                .expect("builtin type"),
            ident,
            display_name: component.display_name(),
            region: "us-east-1",
            parent: None,
            containers: Vec::new(),
            security_groups: Vec::new(),
        }
    }

    fn flat(blocks: Vec<Block>) -> String {
        squash(&render(blocks))
    }

    const SUBNET_A: BlockRef<'static> = BlockRef {
        resource_type: "aws_subnet",
        ident: "a",
    };
    const SUBNET_B: BlockRef<'static> = BlockRef {
        resource_type: "aws_subnet",
        ident: "b",
    };

    #[test]
    fn subnet_without_vpc_uses_variable() {
        let c = Component::new("s", SUBNET).with_attr("public", true);
        let text = flat(subnet(&ctx(&c, "app")));
        assert!(text.contains("vpc_id=var.vpc_id"));
        assert!(text.contains("map_public_ip_on_launch=true"));
    }

    #[test]
    fn subnet_zone_follows_region_unless_set() {
        let c = Component::new("s", SUBNET);
        let mut cx = ctx(&c, "app");
        cx.region = "eu-west-2";
        assert!(flat(subnet(&cx)).contains("availability_zone=\"eu-west-2a\""));

        let pinned = Component::new("s", SUBNET).with_attr("availability_zone", "eu-west-2c");
        let mut cx = ctx(&pinned, "app");
        cx.region = "eu-west-2";
        assert!(flat(subnet(&cx)).contains("availability_zone=\"eu-west-2c\""));
    }

    #[test]
    fn ec2_with_count_and_groups() {
        let c = Component::new("e", EC2).with_name("web").with_attr("instances", 2);
        let mut cx = ctx(&c, "web");
        cx.parent = Some(SUBNET_A);
        cx.security_groups = vec![BlockRef {
            resource_type: "aws_security_group",
            ident: "web_sg",
        }];
        let text = render(ec2(&cx));
        let compact = squash(&text);
        assert!(compact.contains("count=2"));
        assert!(compact.contains("subnet_id=aws_subnet.a.id"));
        assert!(compact.contains("vpc_security_group_ids=[aws_security_group.web_sg.id"));
        assert!(text.contains("\"web-${count.index + 1}\""));
    }

    #[test]
    fn rds_across_subnets_is_multi_az() {
        let c = Component::new("db", RDS).with_name("Orders DB");
        let mut cx = ctx(&c, "orders_db");
        cx.containers = vec![SUBNET_A, SUBNET_B];
        cx.parent = Some(SUBNET_B);
        let text = render(rds(&cx));
        assert!(text.contains("resource \"aws_db_subnet_group\" \"orders_db\""));
        let compact = squash(&text);
        assert!(compact.contains("subnet_ids=[aws_subnet.a.id,aws_subnet.b.id"));
        assert!(compact.contains("multi_az=true"));
        assert!(compact.contains("identifier=\"orders-db\""));
    }

    #[test]
    fn s3_versioning_adds_second_resource() {
        let c = Component::new("b", S3).with_name("Assets").with_attr("versioning", json!(true));
        let text = render(s3(&ctx(&c, "assets")));
        assert!(text.contains("resource \"aws_s3_bucket_versioning\" \"assets\""));
        let compact = squash(&text);
        assert!(compact.contains("bucket=\"assets\""));
        assert!(compact.contains("bucket=aws_s3_bucket.assets.id"));
    }

    #[test]
    fn odd_attribute_values_fall_back() {
        let c = Component::new("q", SQS)
            .with_name("jobs")
            .with_attr("visibility_timeout_seconds", json!({ "nested": true }))
            .with_attr("fifo", "true");
        let text = flat(sqs(&ctx(&c, "jobs")));
        assert!(text.contains("visibility_timeout_seconds=30"));
        assert!(text.contains("name=\"jobs.fifo\""));
    }

    #[test]
    fn aws_names_are_normalised() {
        let queue = Component::new("q", SQS).with_name("Orders Queue");
        assert!(flat(sqs(&ctx(&queue, "orders_queue"))).contains("name=\"orders-queue\""));

        let topic = Component::new("t", SNS).with_name("Order Events!");
        assert!(flat(sns(&ctx(&topic, "order_events"))).contains("name=\"order-events\""));

        let table = Component::new("d", DYNAMODB).with_name("User Sessions");
        assert!(flat(dynamodb(&ctx(&table, "user_sessions"))).contains("name=\"user-sessions\""));
    }
}
