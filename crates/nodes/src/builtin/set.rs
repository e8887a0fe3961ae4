//! `set` — write fixed fields onto every item.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::descriptor::NodeDescriptor;
use crate::item::{main_items, main_port, Item, PairedItem, PortData};
use crate::properties::{NodeProperty, PropertyKind};
use crate::traits::{InvocationContext, NodeType};
use crate::NodeError;

pub struct Set {
    descriptor: NodeDescriptor,
}

impl Set {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let descriptor = NodeDescriptor::new("set", "Set", 1)
            .with_group(&["transform"])
            .with_properties(vec![
                NodeProperty::new("fields", "Fields to Set", PropertyKind::Collection).required(),
                NodeProperty::new("keepOnlySet", "Keep Only Set Fields", PropertyKind::Boolean)
                    .with_default(Value::Bool(false)),
            ]);
        Self { descriptor }
    }
}

#[async_trait]
impl NodeType for Set {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError> {
        let fields = ctx
            .parameters
            .get("fields")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let keep_only_set = ctx
            .parameters
            .get("keepOnlySet")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let inputs = main_items(&ctx.input);
        // A set node with no input still emits one item, so it can seed data
        // right after a bare trigger.
        let sources: Vec<Value> = if inputs.is_empty() {
            vec![Value::Object(Map::new())]
        } else {
            inputs.iter().map(|item| item.json.clone()).collect()
        };

        let items = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let mut json = if keep_only_set {
                    Map::new()
                } else {
                    source.as_object().cloned().unwrap_or_default()
                };
                for (key, value) in &fields {
                    json.insert(key.clone(), value.clone());
                }
                Item {
                    json: Value::Object(json),
                    binary: None,
                    paired_item: Some(PairedItem { item: index, input: None }),
                }
            })
            .collect();

        Ok(main_port(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::invocation;
    use serde_json::json;

    #[tokio::test]
    async fn merges_fields_into_every_item() {
        let node = Set::new();
        let ctx = invocation(
            json!({ "fields": { "status": "ok" } }),
            main_port(vec![
                Item::from_json(json!({ "id": 1 })),
                Item::from_json(json!({ "id": 2 })),
            ]),
        );

        let output = node.execute(&ctx).await.unwrap();
        let items = main_items(&output);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].json, json!({ "id": 1, "status": "ok" }));
        assert_eq!(items[1].json, json!({ "id": 2, "status": "ok" }));
    }

    #[tokio::test]
    async fn emits_one_item_when_input_is_empty() {
        let node = Set::new();
        let ctx = invocation(json!({ "fields": { "seeded": true }, "keepOnlySet": true }), PortData::new());

        let output = node.execute(&ctx).await.unwrap();
        assert_eq!(main_items(&output), &[Item {
            json: json!({ "seeded": true }),
            binary: None,
            paired_item: Some(PairedItem { item: 0, input: None }),
        }]);
    }
}
