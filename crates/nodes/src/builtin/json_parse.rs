//! `jsonParse` — parse a string field into structured JSON.

use async_trait::async_trait;
use serde_json::Value;

use crate::descriptor::NodeDescriptor;
use crate::item::{main_items, main_port, Item, PairedItem, PortData};
use crate::properties::{NodeProperty, PropertyKind};
use crate::traits::{InvocationContext, NodeType};
use crate::NodeError;

pub struct JsonParse {
    descriptor: NodeDescriptor,
}

impl JsonParse {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let descriptor = NodeDescriptor::new("jsonParse", "JSON Parse", 1)
            .with_group(&["transform"])
            .with_properties(vec![
                NodeProperty::new("property", "Source Property", PropertyKind::String)
                    .with_default(Value::String("data".into())),
                NodeProperty::new("target", "Target Property", PropertyKind::String),
            ]);
        Self { descriptor }
    }
}

#[async_trait]
impl NodeType for JsonParse {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError> {
        let property = ctx.param_str("property", "data");
        let target = ctx.param_str("target", &property);

        let items = main_items(&ctx.input)
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let mut json = item.json.as_object().cloned().unwrap_or_default();
                match json.get(&property) {
                    Some(Value::String(raw)) => {
                        let parsed: Value = serde_json::from_str(raw).map_err(|e| {
                            NodeError::Fatal(format!("property '{property}' is not valid JSON: {e}"))
                        })?;
                        json.insert(target.clone(), parsed);
                    }
                    // Already structured: copy through untouched.
                    Some(value) => {
                        let value = value.clone();
                        json.insert(target.clone(), value);
                    }
                    None => {
                        return Err(NodeError::Fatal(format!(
                            "property '{property}' not found on item {index}"
                        )));
                    }
                }
                Ok(Item {
                    json: Value::Object(json),
                    binary: item.binary.clone(),
                    paired_item: Some(PairedItem { item: index, input: None }),
                })
            })
            .collect::<Result<Vec<_>, NodeError>>()?;

        Ok(main_port(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::invocation;
    use serde_json::json;

    #[tokio::test]
    async fn parses_a_string_field_in_place() {
        let node = JsonParse::new();
        let ctx = invocation(
            json!({ "property": "data" }),
            main_port(vec![Item::from_json(json!({ "data": r#"{"ok":true}"# }))]),
        );

        let output = node.execute(&ctx).await.unwrap();
        assert_eq!(main_items(&output)[0].json, json!({ "data": { "ok": true } }));
    }

    #[tokio::test]
    async fn invalid_json_is_a_fatal_error() {
        let node = JsonParse::new();
        let ctx = invocation(
            json!({ "property": "data" }),
            main_port(vec![Item::from_json(json!({ "data": "{nope" }))]),
        );

        assert!(matches!(
            node.execute(&ctx).await,
            Err(NodeError::Fatal(_))
        ));
    }
}
