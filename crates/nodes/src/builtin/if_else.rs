//! `ifElse` — the conditional router.
//!
//! Evaluates its condition against the *first* incoming item and routes all
//! items to the chosen branch.  Three modes: `simple` (one predicate),
//! `combine` (a flat predicate list joined by AND/OR), `grouped` (nested
//! groups with a per-group operator and an outer operator between groups).

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::descriptor::NodeDescriptor;
use crate::item::{main_items, PortData};
use crate::properties::{NodeProperty, PropertyKind};
use crate::traits::{InvocationContext, NodeType};
use crate::NodeError;

/// The closed predicate operator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Comparison {
    Equal,
    NotEqual,
    Larger,
    LargerEqual,
    Smaller,
    SmallerEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    Regex,
}

/// One `{key, expression, value}` predicate.
#[derive(Debug, Clone, Deserialize)]
struct Predicate {
    key: String,
    expression: Comparison,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Join {
    And,
    Or,
}

impl Join {
    fn apply(self, outcomes: impl IntoIterator<Item = bool>) -> bool {
        let mut iter = outcomes.into_iter();
        match self {
            // An empty predicate list matches everything.
            Join::And => iter.all(|b| b),
            Join::Or => iter.any(|b| b),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PredicateGroup {
    conditions: Vec<Predicate>,
    #[serde(default = "default_join")]
    operation: Join,
}

fn default_join() -> Join {
    Join::And
}

pub struct IfElse {
    descriptor: NodeDescriptor,
}

impl IfElse {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let descriptor = NodeDescriptor::new("ifElse", "If/Else", 1)
            .with_group(&["transform"])
            .with_outputs(&["true", "false"])
            .with_properties(vec![
                NodeProperty::new("mode", "Mode", PropertyKind::Options)
                    .with_default(Value::String("simple".into()))
                    .with_options(vec![json!("simple"), json!("combine"), json!("grouped")]),
                NodeProperty::new("condition", "Condition", PropertyKind::Json),
                NodeProperty::new("conditions", "Conditions", PropertyKind::Json),
                NodeProperty::new("combineOperation", "Combine Operation", PropertyKind::Options)
                    .with_default(Value::String("and".into()))
                    .with_options(vec![json!("and"), json!("or")]),
                NodeProperty::new("groups", "Condition Groups", PropertyKind::Json),
                NodeProperty::new("groupOperation", "Group Operation", PropertyKind::Options)
                    .with_default(Value::String("and".into()))
                    .with_options(vec![json!("and"), json!("or")]),
            ]);
        Self { descriptor }
    }

    fn decide(&self, parameters: &Map<String, Value>, subject: &Value) -> Result<bool, NodeError> {
        let mode = parameters
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or("simple");

        match mode {
            "simple" => {
                let predicate: Predicate = from_param(parameters, "condition")?;
                evaluate_predicate(&predicate, subject)
            }
            "combine" => {
                let predicates: Vec<Predicate> = from_param(parameters, "conditions")?;
                let join: Join = join_param(parameters, "combineOperation");
                let outcomes = predicates
                    .iter()
                    .map(|p| evaluate_predicate(p, subject))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(join.apply(outcomes))
            }
            "grouped" => {
                let groups: Vec<PredicateGroup> = from_param(parameters, "groups")?;
                let outer: Join = join_param(parameters, "groupOperation");
                let outcomes = groups
                    .iter()
                    .map(|group| {
                        let inner = group
                            .conditions
                            .iter()
                            .map(|p| evaluate_predicate(p, subject))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(group.operation.apply(inner))
                    })
                    .collect::<Result<Vec<_>, NodeError>>()?;
                Ok(outer.apply(outcomes))
            }
            other => Err(NodeError::Fatal(format!("unknown ifElse mode '{other}'"))),
        }
    }
}

fn from_param<T: serde::de::DeserializeOwned>(
    parameters: &Map<String, Value>,
    name: &str,
) -> Result<T, NodeError> {
    let value = parameters
        .get(name)
        .ok_or_else(|| NodeError::Fatal(format!("parameter '{name}' is required")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| NodeError::Fatal(format!("parameter '{name}' is malformed: {e}")))
}

fn join_param(parameters: &Map<String, Value>, name: &str) -> Join {
    match parameters.get(name).and_then(Value::as_str) {
        Some("or") => Join::Or,
        _ => Join::And,
    }
}

/// Walk a dot-path through the subject object.
fn lookup<'v>(subject: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = subject;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn evaluate_predicate(predicate: &Predicate, subject: &Value) -> Result<bool, NodeError> {
    let actual = lookup(subject, &predicate.key);
    let expected = &predicate.value;

    let result = match predicate.expression {
        Comparison::Equal => actual.is_some_and(|a| values_equal(a, expected)),
        Comparison::NotEqual => !actual.is_some_and(|a| values_equal(a, expected)),
        Comparison::Larger | Comparison::LargerEqual | Comparison::Smaller
        | Comparison::SmallerEqual => {
            let (Some(a), Some(b)) = (actual.and_then(Value::as_f64), expected.as_f64()) else {
                return Ok(false);
            };
            match predicate.expression {
                Comparison::Larger => a > b,
                Comparison::LargerEqual => a >= b,
                Comparison::Smaller => a < b,
                Comparison::SmallerEqual => a <= b,
                _ => unreachable!(),
            }
        }
        Comparison::Contains => actual.is_some_and(|a| contains(a, expected)),
        Comparison::NotContains => !actual.is_some_and(|a| contains(a, expected)),
        Comparison::StartsWith => {
            actual.is_some_and(|a| as_text(a).starts_with(&as_text(expected)))
        }
        Comparison::EndsWith => actual.is_some_and(|a| as_text(a).ends_with(&as_text(expected))),
        Comparison::IsEmpty => is_empty(actual),
        Comparison::IsNotEmpty => !is_empty(actual),
        Comparison::Regex => {
            let pattern = as_text(expected);
            let regex = Regex::new(&pattern).map_err(|e| {
                NodeError::Fatal(format!("invalid regex '{pattern}': {e}"))
            })?;
            actual.is_some_and(|a| regex.is_match(&as_text(a)))
        }
    };
    Ok(result)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    // Numbers compare numerically so 1 == 1.0.
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    a == b
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => s.contains(&as_text(expected)),
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

#[async_trait]
impl NodeType for IfElse {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError> {
        let items = main_items(&ctx.input);
        // Routing follows the first item; an input with no items routes to
        // the false branch via the empty-subject predicate outcomes.
        let subject = items.first().map_or(json!({}), |item| item.json.clone());

        let branch = self.decide(&ctx.parameters, &subject)?;
        let port = if branch { "true" } else { "false" };

        let mut output = PortData::new();
        output.insert(port.to_owned(), items.to_vec());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{main_port, Item};
    use crate::mock::invocation;

    fn run_branch(parameters: Value, first_item: Value) -> &'static str {
        let node = IfElse::new();
        let ctx = invocation(parameters, main_port(vec![Item::from_json(first_item)]));
        let output = futures_block(node.execute(&ctx)).unwrap();
        if output.contains_key("true") { "true" } else { "false" }
    }

    fn futures_block<T>(fut: impl std::future::Future<Output = T>) -> T {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn simple_mode_routes_on_one_predicate() {
        let params = json!({
            "mode": "simple",
            "condition": { "key": "status", "expression": "equal", "value": "active" }
        });
        assert_eq!(run_branch(params.clone(), json!({ "status": "active" })), "true");
        assert_eq!(run_branch(params, json!({ "status": "paused" })), "false");
    }

    #[test]
    fn combine_mode_joins_predicates() {
        let params = json!({
            "mode": "combine",
            "combineOperation": "or",
            "conditions": [
                { "key": "count", "expression": "larger", "value": 10 },
                { "key": "status", "expression": "equal", "value": "active" }
            ]
        });
        assert_eq!(run_branch(params.clone(), json!({ "count": 3, "status": "active" })), "true");
        assert_eq!(run_branch(params, json!({ "count": 3, "status": "paused" })), "false");
    }

    #[test]
    fn grouped_mode_nests_operators() {
        // (a AND b) OR (c)
        let params = json!({
            "mode": "grouped",
            "groupOperation": "or",
            "groups": [
                {
                    "operation": "and",
                    "conditions": [
                        { "key": "tier", "expression": "equal", "value": "pro" },
                        { "key": "seats", "expression": "largerEqual", "value": 5 }
                    ]
                },
                {
                    "operation": "and",
                    "conditions": [
                        { "key": "vip", "expression": "equal", "value": true }
                    ]
                }
            ]
        });
        assert_eq!(run_branch(params.clone(), json!({ "tier": "pro", "seats": 9, "vip": false })), "true");
        assert_eq!(run_branch(params.clone(), json!({ "tier": "free", "seats": 9, "vip": true })), "true");
        assert_eq!(run_branch(params, json!({ "tier": "free", "seats": 1, "vip": false })), "false");
    }

    #[test]
    fn string_and_collection_operators() {
        let by = |expression: &str, value: Value, subject: Value| {
            run_branch(
                json!({
                    "mode": "simple",
                    "condition": { "key": "field", "expression": expression, "value": value }
                }),
                json!({ "field": subject }),
            ) == "true"
        };

        assert!(by("contains", json!("ell"), json!("hello")));
        assert!(by("contains", json!(2), json!([1, 2, 3])));
        assert!(by("notContains", json!("xyz"), json!("hello")));
        assert!(by("startsWith", json!("he"), json!("hello")));
        assert!(by("endsWith", json!("lo"), json!("hello")));
        assert!(by("isEmpty", json!(null), json!("")));
        assert!(by("isNotEmpty", json!(null), json!("text")));
        assert!(by("regex", json!("^h.*o$"), json!("hello")));
        assert!(!by("regex", json!("^x"), json!("hello")));
    }

    #[test]
    fn all_items_follow_the_first_items_branch() {
        let node = IfElse::new();
        let ctx = invocation(
            json!({
                "mode": "simple",
                "condition": { "key": "status", "expression": "equal", "value": "active" }
            }),
            main_port(vec![
                Item::from_json(json!({ "status": "active" })),
                Item::from_json(json!({ "status": "paused" })),
            ]),
        );

        let output = futures_block(node.execute(&ctx)).unwrap();
        assert_eq!(output["true"].len(), 2);
        assert!(!output.contains_key("false"));
    }

    #[test]
    fn invalid_regex_is_fatal() {
        let node = IfElse::new();
        let ctx = invocation(
            json!({
                "mode": "simple",
                "condition": { "key": "f", "expression": "regex", "value": "([" }
            }),
            main_port(vec![Item::from_json(json!({ "f": "x" }))]),
        );
        assert!(matches!(
            futures_block(node.execute(&ctx)),
            Err(NodeError::Fatal(_))
        ));
    }
}
