//! `delay` — wait a configured duration, observing cancellation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::descriptor::NodeDescriptor;
use crate::item::{main_items, main_port, PortData};
use crate::properties::{NodeProperty, PropertyKind};
use crate::traits::{InvocationContext, NodeType};
use crate::NodeError;

pub struct Delay {
    descriptor: NodeDescriptor,
}

impl Delay {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let descriptor = NodeDescriptor::new("delay", "Delay", 1)
            .with_group(&["utility"])
            .with_properties(vec![NodeProperty::new(
                "durationMs",
                "Duration (ms)",
                PropertyKind::Number,
            )
            .with_default(Value::Number(1000.into()))]);
        Self { descriptor }
    }
}

#[async_trait]
impl NodeType for Delay {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError> {
        let duration = Duration::from_millis(ctx.param_f64("durationMs", 1000.0).max(0.0) as u64);

        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
        }

        Ok(main_port(main_items(&ctx.input).to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;
    use crate::mock::invocation;
    use serde_json::json;

    #[tokio::test]
    async fn forwards_input_after_the_sleep() {
        let node = Delay::new();
        let ctx = invocation(
            json!({ "durationMs": 1 }),
            main_port(vec![Item::from_json(json!({ "x": 1 }))]),
        );

        let output = node.execute(&ctx).await.unwrap();
        assert_eq!(main_items(&output).len(), 1);
    }

    #[tokio::test]
    async fn observes_cancellation_mid_sleep() {
        let node = Delay::new();
        let ctx = invocation(json!({ "durationMs": 60000 }), PortData::new());
        ctx.cancel.cancel();

        assert!(matches!(node.execute(&ctx).await, Err(NodeError::Cancelled)));
    }
}
