//! `{{ … }}` template resolution over string parameters.

use serde_json::{Map, Value};

use crate::context::ExpressionContext;
use crate::eval::{display_string, evaluate, EvalValue};
use crate::ExpressionError;

/// One piece of a parameter string: literal text or an expression body.
enum Segment<'a> {
    Literal(&'a str),
    Fragment(&'a str),
}

fn split_segments(input: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                segments.push(Segment::Fragment(&after_open[..close]));
                rest = &after_open[close + 2..];
            }
            None => {
                // An unterminated `{{` is treated as literal text.
                segments.push(Segment::Literal(&rest[open..]));
                return segments;
            }
        }
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    segments
}

/// Resolve one parameter string.
///
/// A string consisting of exactly one fragment and nothing else returns the
/// fragment's raw typed value; any other mix concatenates literal parts with
/// stringified fragment results.  Strings without fragments pass through
/// verbatim.
pub fn resolve_template(input: &str, ctx: &ExpressionContext) -> Result<Value, ExpressionError> {
    let segments = split_segments(input);

    let fragment_count = segments
        .iter()
        .filter(|s| matches!(s, Segment::Fragment(_)))
        .count();
    if fragment_count == 0 {
        return Ok(Value::String(input.to_owned()));
    }

    // Exactly one fragment and no literal text: the parameter takes the
    // fragment's typed value.
    if segments.len() == 1 {
        if let Segment::Fragment(body) = &segments[0] {
            return Ok(evaluate(body.trim(), ctx)?.into_value());
        }
    }

    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Fragment(body) => {
                let value = evaluate(body.trim(), ctx)?;
                out.push_str(&display_string(&value));
            }
        }
    }
    Ok(Value::String(out))
}

/// Resolve every string parameter in `parameters`, recursing into nested
/// objects and arrays so collection-typed parameters get the same treatment.
pub fn resolve_parameters(
    parameters: &Map<String, Value>,
    ctx: &ExpressionContext,
) -> Result<Map<String, Value>, ExpressionError> {
    parameters
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, ctx)?)))
        .collect()
}

fn resolve_value(value: &Value, ctx: &ExpressionContext) -> Result<Value, ExpressionError> {
    match value {
        Value::String(s) => resolve_template(s, ctx),
        Value::Object(map) => Ok(Value::Object(resolve_parameters(map, ctx)?)),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, ctx))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> ExpressionContext {
        let now = chrono::Utc.with_ymd_and_hms(2024, 5, 4, 12, 30, 0).unwrap();
        ExpressionContext::new(now)
            .with_json(json!({ "status": "active", "count": 3, "meta": { "tags": ["x"] } }))
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(
            resolve_template("no expressions here", &ctx()).unwrap(),
            json!("no expressions here")
        );
    }

    #[test]
    fn single_fragment_returns_the_raw_typed_value() {
        assert_eq!(resolve_template("{{ $json.count }}", &ctx()).unwrap(), json!(3));
        assert_eq!(
            resolve_template("{{ $json.meta }}", &ctx()).unwrap(),
            json!({ "tags": ["x"] })
        );
        // Undefined collapses to null in the typed position.
        assert_eq!(resolve_template("{{ $json.ghost }}", &ctx()).unwrap(), json!(null));
    }

    #[test]
    fn mixed_templates_concatenate_stringified_fragments() {
        assert_eq!(
            resolve_template("status={{ $json.status }}, n={{ $json.count + 1 }}", &ctx()).unwrap(),
            json!("status=active, n=4")
        );
        assert_eq!(
            resolve_template("x={{ $json.ghost }} y={{ null }}", &ctx()).unwrap(),
            json!("x=undefined y=null")
        );
        assert_eq!(
            resolve_template("tags={{ $json.meta.tags }}", &ctx()).unwrap(),
            json!(r#"tags=["x"]"#)
        );
    }

    #[test]
    fn failures_carry_the_offending_fragment() {
        let err = resolve_template("ok {{ nonsense( }}", &ctx()).unwrap_err();
        match err {
            ExpressionError::Syntax { fragment, .. } | ExpressionError::Evaluation { fragment, .. } => {
                assert_eq!(fragment, "nonsense(");
            }
        }
    }

    #[test]
    fn nested_parameters_resolve_recursively() {
        let params = json!({
            "url": "https://api/{{ $json.status }}",
            "options": { "limit": "{{ $json.count }}", "flags": ["{{ $json.status }}", "fixed"] },
            "number": 7
        })
        .as_object()
        .unwrap()
        .clone();

        let resolved = resolve_parameters(&params, &ctx()).unwrap();
        assert_eq!(resolved["url"], json!("https://api/active"));
        assert_eq!(resolved["options"]["limit"], json!(3));
        assert_eq!(resolved["options"]["flags"], json!(["active", "fixed"]));
        assert_eq!(resolved["number"], json!(7));
    }

    #[test]
    fn unterminated_fragment_is_literal_text() {
        assert_eq!(
            resolve_template("broken {{ $json.status", &ctx()).unwrap(),
            json!("broken {{ $json.status")
        );
    }
}
