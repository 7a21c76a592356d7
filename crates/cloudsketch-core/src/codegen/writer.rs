//! Expression constructors shared by the templates, and rendering of
//! finished blocks through `hcl-rs`.

use hcl::expr::{Object, ObjectKey, RawExpression};
use hcl::structure::BlockBuilder;
use hcl::{Block, Body, Expression, Identifier};

pub fn string(value: impl Into<String>) -> Expression {
    Expression::String(value.into())
}

/// Expression emitted verbatim: references (`aws_vpc.main.id`, `var.x`),
/// type names and template strings.
pub fn raw(expr: impl Into<String>) -> Expression {
    Expression::Raw(RawExpression::new(expr.into()))
}

pub fn number(n: i64) -> Expression {
    Expression::Number(hcl::Number::from(n))
}

pub fn boolean(b: bool) -> Expression {
    Expression::Bool(b)
}

pub fn list(items: impl IntoIterator<Item = Expression>) -> Expression {
    Expression::Array(items.into_iter().collect())
}

/// Object literal. Keys that are not valid identifiers are quoted.
pub fn object<K: AsRef<str>>(pairs: impl IntoIterator<Item = (K, Expression)>) -> Expression {
    let object: Object<ObjectKey, Expression> = pairs
        .into_iter()
        .map(|(key, value)| (object_key(key.as_ref()), value))
        .collect();
    Expression::Object(object)
}

fn object_key(key: &str) -> ObjectKey {
    match Identifier::new(key) {
        Ok(ident) => ObjectKey::Identifier(ident),
        Err(_) => ObjectKey::Expression(string(key)),
    }
}

pub fn resource(resource_type: &str, ident: &str) -> BlockBuilder {
    Block::builder("resource")
        .add_label(resource_type)
        .add_label(ident)
}

pub fn labelled(kind: &str, label: &str) -> BlockBuilder {
    Block::builder(kind).add_label(label)
}

pub trait BlockBuilderExt: Sized {
    fn add_attribute_if(self, cond: bool, key: &str, value: impl Into<Expression>) -> Self;
}

impl BlockBuilderExt for BlockBuilder {
    fn add_attribute_if(self, cond: bool, key: &str, value: impl Into<Expression>) -> Self {
        if cond {
            self.add_attribute((key, value.into()))
        } else {
            self
        }
    }
}

/// One HCL body holding `blocks`. A formatter failure is reported as a
/// comment in place of the blocks.
pub fn render(blocks: Vec<Block>) -> String {
    let body = blocks
        .into_iter()
        .fold(Body::builder(), |body, block| body.add_block(block))
        .build();
    match hcl::to_string(&body) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, "failed to format HCL");
            format!("// failed to format HCL: {}", err)
        }
    }
}

/// Whitespace-free copy, for comparing output without depending on the
/// formatter's alignment.
#[cfg(test)]
pub(crate) fn squash(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_labels_references_and_objects() {
        let block = resource("aws_subnet", "app")
            .add_attribute(("vpc_id", raw("aws_vpc.main.id")))
            .add_attribute(("cidr_block", string("10.0.1.0/24")))
            .add_attribute(("subnet_ids", list([raw("aws_subnet.a.id"), raw("aws_subnet.b.id")])))
            .add_attribute(("tags", object([("Name", string("app"))])))
            .build();
        let text = render(vec![block]);
        assert!(text.starts_with("resource \"aws_subnet\" \"app\" {"));
        let flat = squash(&text);
        assert!(flat.contains("vpc_id=aws_vpc.main.id"));
        assert!(flat.contains("cidr_block=\"10.0.1.0/24\""));
        assert!(flat.contains("subnet_ids=[aws_subnet.a.id,aws_subnet.b.id"));
        assert!(flat.contains("Name=\"app\""));
    }

    #[test]
    fn keys_that_are_not_identifiers_are_quoted() {
        let block = Block::builder("default_tags")
            .add_attribute(("tags", object([("team name", string("infra")), ("Owner", string("ops"))])))
            .build();
        let flat = squash(&render(vec![block]));
        assert!(flat.contains("\"teamname\"=\"infra\""));
        assert!(flat.contains("Owner=\"ops\""));
    }

    #[test]
    fn conditional_attributes() {
        let block = resource("aws_db_instance", "db")
            .add_attribute_if(true, "multi_az", boolean(true))
            .add_attribute_if(false, "count", number(3))
            .build();
        let text = render(vec![block]);
        assert!(squash(&text).contains("multi_az=true"));
        assert!(!text.contains("count"));
    }

    #[test]
    fn quotes_inside_strings_survive() {
        let block = resource("aws_sns_topic", "t")
            .add_attribute(("name", string("say \"hi\"")))
            .build();
        assert!(render(vec![block]).contains(r#""say \"hi\"""#));
    }
}
