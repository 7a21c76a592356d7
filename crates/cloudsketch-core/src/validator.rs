use serde::Serialize;

use crate::registry::{
    Registry, DYNAMODB, EC2, ELASTICACHE, LAMBDA, LOAD_BALANCER, RDS, SECURITY_GROUP, SNS, SQS,
    SUBNET, VPC,
};
use crate::{Component, Connection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    pub valid: bool,
    pub message: String,
}

impl ConnectionCheck {
    pub fn accept(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Accept(String),
    Reject(String),
    /// Not decided here; fall through to the next rule.
    Defer,
}

/// What a pair rule sees. `subject`/`other` are the endpoints in the
/// orientation the rule matched; `source`/`target` keep the caller's.
pub struct RuleInput<'a> {
    pub registry: &'a Registry,
    pub source: &'a Component,
    pub target: &'a Component,
    pub subject: &'a Component,
    pub other: &'a Component,
    pub components: &'a [Component],
    pub connections: &'a [Connection],
}

pub struct PairRule {
    pub name: &'static str,
    /// Matches on `(subject type, other type)`.
    pub applies: fn(&Registry, &str, &str) -> bool,
    pub check: fn(&RuleInput<'_>) -> RuleOutcome,
}

/// Type-pair rules in priority order. Each is tried with the endpoints in
/// both orientations before moving on.
pub const PAIR_RULES: &[PairRule] = &[
    PairRule {
        name: "security-group-attach",
        applies: is_security_group,
        check: attach_security_group,
    },
    PairRule {
        name: "containment",
        applies: nests_in,
        check: check_containment,
    },
    PairRule {
        name: "misplaced-containment",
        applies: is_misplaced,
        check: reject_misplaced,
    },
];

fn is_security_group(_: &Registry, subject: &str, _: &str) -> bool {
    subject == SECURITY_GROUP
}

fn nests_in(registry: &Registry, subject: &str, other: &str) -> bool {
    registry.can_nest(subject, other)
}

fn attach_security_group(input: &RuleInput<'_>) -> RuleOutcome {
    let Some(sg) = input.registry.metadata(SECURITY_GROUP) else {
        return RuleOutcome::Defer;
    };
    if sg.allows_connection_to(&input.other.node_type) {
        return RuleOutcome::Accept(success_message(input.source, input.target));
    }
    let targets: Vec<&str> = sg
        .allowed_connections
        .iter()
        .map(|t| input.registry.label(t))
        .collect();
    RuleOutcome::Reject(format!(
        "Security groups can only be attached to: {}",
        targets.join(", ")
    ))
}

fn check_containment(input: &RuleInput<'_>) -> RuleOutcome {
    let registry = input.registry;
    let child = input.subject;
    let container = input.other;
    let spans = registry
        .metadata(&child.node_type)
        .is_some_and(|m| m.spans_multiple_containers);

    if !spans {
        let already_placed = input
            .connections
            .iter()
            .filter_map(|conn| conn.other_end(&child.id))
            .filter(|&end| end != container.id)
            .filter_map(|end| input.components.iter().find(|c| c.id == end))
            .any(|existing| registry.can_nest(&child.node_type, &existing.node_type));
        if already_placed {
            return RuleOutcome::Reject(format!(
                "This {} is already placed in a {}",
                registry.label(&child.node_type),
                registry.label(&container.node_type)
            ));
        }
    }
    RuleOutcome::Accept(success_message(input.source, input.target))
}

fn is_misplaced(registry: &Registry, subject: &str, other: &str) -> bool {
    let (Some(subject_meta), Some(other_meta)) = (registry.metadata(subject), registry.metadata(other))
    else {
        return false;
    };
    other_meta.is_container
        && !subject_meta.must_be_contained_by.is_empty()
        && !subject_meta.must_be_contained_by.contains(other)
}

fn reject_misplaced(input: &RuleInput<'_>) -> RuleOutcome {
    let registry = input.registry;
    let required: Vec<&str> = registry
        .metadata(&input.subject.node_type)
        .map(|m| m.must_be_contained_by.iter().map(|t| registry.label(t)).collect())
        .unwrap_or_default();
    RuleOutcome::Reject(format!(
        "A {} must be placed in a {}, not directly in a {}",
        registry.label(&input.subject.node_type),
        required.join(" or "),
        registry.label(&input.other.node_type)
    ))
}

/// Human-readable descriptions of what an accepted edge means, keyed by
/// unordered type pair.
const PAIR_MESSAGES: &[(&str, &str, &str)] = &[
    (SUBNET, VPC, "This will place the subnet in this VPC"),
    (EC2, SUBNET, "This will place the EC2 instance in this subnet"),
    (LAMBDA, SUBNET, "This will run the Lambda function inside this subnet"),
    (RDS, SUBNET, "This will add this subnet to the database's subnet group"),
    (ELASTICACHE, SUBNET, "This will place the cache cluster in this subnet"),
    (LOAD_BALANCER, SUBNET, "This will attach the load balancer to this subnet"),
    (SECURITY_GROUP, EC2, "This will attach the security group to the EC2 instance"),
    (SECURITY_GROUP, RDS, "This will attach the security group to the database"),
    (SECURITY_GROUP, ELASTICACHE, "This will attach the security group to the cache cluster"),
    (SECURITY_GROUP, LOAD_BALANCER, "This will attach the security group to the load balancer"),
    (LOAD_BALANCER, EC2, "The load balancer will route traffic to this EC2 instance"),
    (LOAD_BALANCER, LAMBDA, "The load balancer will invoke this Lambda function"),
    (EC2, RDS, "The EC2 instance will connect to this database"),
    (LAMBDA, DYNAMODB, "The Lambda function will read and write this table"),
    (SQS, LAMBDA, "Messages in this queue will trigger the Lambda function"),
    (SNS, SQS, "The topic will fan out to this queue"),
];

pub fn success_message(source: &Component, target: &Component) -> String {
    let (s, t) = (source.node_type.as_str(), target.node_type.as_str());
    PAIR_MESSAGES
        .iter()
        .find(|(a, b, _)| (*a == s && *b == t) || (*a == t && *b == s))
        .map(|(_, _, msg)| msg.to_string())
        .unwrap_or_else(|| format!("Connected to {}", target.display_name()))
}

pub struct Validator<'r> {
    registry: &'r Registry,
    rules: &'r [PairRule],
}

impl<'r> Validator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            rules: PAIR_RULES,
        }
    }

    pub fn with_rules(registry: &'r Registry, rules: &'r [PairRule]) -> Self {
        Self { registry, rules }
    }

    /// Decide whether `source` and `target` may be connected. Never mutates.
    pub fn validate(
        &self,
        source: Option<&Component>,
        target: Option<&Component>,
        components: &[Component],
        connections: &[Connection],
    ) -> ConnectionCheck {
        let check = self.evaluate(source, target, components, connections);
        if !check.valid {
            tracing::debug!(
                source = source.map(|c| c.id.as_str()).unwrap_or("<missing>"),
                target = target.map(|c| c.id.as_str()).unwrap_or("<missing>"),
                reason = %check.message,
                "connection rejected"
            );
        }
        check
    }

    /// Same as [`Validator::validate`], looking the endpoints up by id.
    pub fn validate_ids(
        &self,
        from: &str,
        to: &str,
        components: &[Component],
        connections: &[Connection],
    ) -> ConnectionCheck {
        let find = |id: &str| components.iter().find(|c| c.id == id);
        self.validate(find(from), find(to), components, connections)
    }

    fn evaluate(
        &self,
        source: Option<&Component>,
        target: Option<&Component>,
        components: &[Component],
        connections: &[Connection],
    ) -> ConnectionCheck {
        let (Some(source), Some(target)) = (source, target) else {
            return ConnectionCheck::reject("Both components must exist");
        };
        if source.id == target.id {
            return ConnectionCheck::reject("Cannot connect a component to itself");
        }
        if connections.iter().any(|c| c.joins(&source.id, &target.id)) {
            return ConnectionCheck::reject("This connection already exists");
        }

        let message = match self.apply_rules(source, target, components, connections) {
            RuleOutcome::Reject(message) => return ConnectionCheck::reject(message),
            RuleOutcome::Accept(message) => message,
            RuleOutcome::Defer => match self.generic_rule(source, target) {
                Ok(message) => message,
                Err(message) => return ConnectionCheck::reject(message),
            },
        };

        // Single hop only; the duplicate check above already covers it today.
        if connections
            .iter()
            .any(|c| c.from == target.id && c.to == source.id)
        {
            return ConnectionCheck::reject("This would create a circular connection");
        }

        ConnectionCheck::accept(message)
    }

    fn apply_rules(
        &self,
        source: &Component,
        target: &Component,
        components: &[Component],
        connections: &[Connection],
    ) -> RuleOutcome {
        for rule in self.rules {
            for (subject, other) in [(source, target), (target, source)] {
                if !(rule.applies)(self.registry, &subject.node_type, &other.node_type) {
                    continue;
                }
                let outcome = (rule.check)(&RuleInput {
                    registry: self.registry,
                    source,
                    target,
                    subject,
                    other,
                    components,
                    connections,
                });
                if outcome != RuleOutcome::Defer {
                    tracing::trace!(rule = rule.name, ?outcome, "pair rule decided");
                    return outcome;
                }
            }
        }
        RuleOutcome::Defer
    }

    fn generic_rule(&self, source: &Component, target: &Component) -> Result<String, String> {
        let source_meta = self.registry.metadata(&source.node_type);
        let target_meta = self.registry.metadata(&target.node_type);
        if source_meta.is_none() {
            return Err(format!("Unknown component type: {}", source.node_type));
        }
        if target_meta.is_none() {
            return Err(format!("Unknown component type: {}", target.node_type));
        }
        let allowed = source_meta.is_some_and(|m| m.allows_connection_to(&target.node_type))
            || target_meta.is_some_and(|m| m.allows_connection_to(&source.node_type));
        if allowed {
            Ok(success_message(source, target))
        } else {
            Err(format!(
                "A {} cannot be connected to a {}",
                self.registry.label(&source.node_type),
                self.registry.label(&target.node_type)
            ))
        }
    }
}
