//! Node parameter descriptors and validation.
//!
//! Mirrors the credential-property shape: the same `DisplayOptions`
//! visibility rules apply, evaluated against the current parameter values
//! before required/type checks.

use credentials::types::DisplayOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::descriptor::NodeDescriptor;
use crate::NodeError;

/// What kind of value a node parameter holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyKind {
    String,
    Number,
    Boolean,
    Options,
    /// Nested object of sub-values.
    Collection,
    /// Arbitrary JSON payload.
    Json,
    /// Reference to a credential of a declared type.
    Credential,
}

/// One parameter of a node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeProperty {
    pub name: String,
    pub display_name: String,
    pub kind: PropertyKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Allowed values for `PropertyKind::Options`.
    #[serde(default)]
    pub options: Option<Vec<Value>>,
    #[serde(default)]
    pub display_options: Option<DisplayOptions>,
}

impl NodeProperty {
    pub fn new(name: &str, display_name: &str, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            kind,
            required: false,
            default: None,
            options: None,
            display_options: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_display_options(mut self, display_options: DisplayOptions) -> Self {
        self.display_options = Some(display_options);
        self
    }
}

/// Walk the visible properties of `descriptor` and check required/type
/// constraints against `values`.
///
/// # Errors
/// [`NodeError::Fatal`] naming the offending parameter — parameter problems
/// are configuration mistakes, never transient.
pub fn validate_parameters(
    descriptor: &NodeDescriptor,
    values: &Map<String, Value>,
) -> Result<(), NodeError> {
    for property in &descriptor.properties {
        let visible = property
            .display_options
            .as_ref()
            .map_or(true, |d| d.is_visible(values));
        if !visible {
            continue;
        }

        let value = values.get(&property.name);
        let missing = match value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        if missing {
            if property.required && property.default.is_none() {
                return Err(NodeError::Fatal(format!(
                    "parameter '{}' is required",
                    property.name
                )));
            }
            continue;
        }
        let value = value.expect("checked above");

        let kind_ok = match property.kind {
            PropertyKind::String | PropertyKind::Credential => value.is_string(),
            PropertyKind::Number => value.is_number(),
            PropertyKind::Boolean => value.is_boolean(),
            PropertyKind::Options => property
                .options
                .as_ref()
                .is_some_and(|allowed| allowed.contains(value)),
            PropertyKind::Collection => value.is_object(),
            // Json accepts anything.
            PropertyKind::Json => true,
        };
        if !kind_ok {
            return Err(NodeError::Fatal(format!(
                "parameter '{}' has the wrong type or an unsupported value",
                property.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NodeDescriptor;
    use serde_json::json;
    use std::collections::HashMap;

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new("probe", "Probe", 1)
            .with_properties(vec![
                NodeProperty::new("url", "URL", PropertyKind::String).required(),
                NodeProperty::new("limit", "Limit", PropertyKind::Number),
                NodeProperty::new("mode", "Mode", PropertyKind::Options)
                    .with_options(vec![json!("fast"), json!("slow")]),
                NodeProperty::new("proxy", "Proxy", PropertyKind::String)
                    .required()
                    .with_display_options(DisplayOptions {
                        show: HashMap::from([("mode".to_string(), vec![json!("slow")])]),
                        hide: HashMap::new(),
                    }),
            ])
    }

    fn object(value: serde_json::Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn required_and_typed_checks_apply_to_visible_properties() {
        let d = descriptor();
        assert!(validate_parameters(&d, &object(json!({ "url": "https://x" }))).is_ok());
        assert!(validate_parameters(&d, &object(json!({}))).is_err());
        assert!(validate_parameters(&d, &object(json!({ "url": "https://x", "limit": "ten" }))).is_err());
        assert!(validate_parameters(&d, &object(json!({ "url": "https://x", "mode": "warp" }))).is_err());
    }

    #[test]
    fn hidden_required_properties_are_not_demanded() {
        let d = descriptor();
        // proxy is only shown when mode == "slow".
        assert!(validate_parameters(&d, &object(json!({ "url": "https://x", "mode": "fast" }))).is_ok());
        assert!(validate_parameters(&d, &object(json!({ "url": "https://x", "mode": "slow" }))).is_err());
        assert!(validate_parameters(
            &d,
            &object(json!({ "url": "https://x", "mode": "slow", "proxy": "http://p" }))
        )
        .is_ok());
    }
}
