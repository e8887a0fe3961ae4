//! Trigger nodes — sources of execution.
//!
//! The engine seeds a trigger node's input with the submitted trigger data;
//! the node's only job is to forward it downstream as items.

use async_trait::async_trait;

use crate::descriptor::{NodeDescriptor, TriggerType};
use crate::item::{main_items, main_port, Item, PortData};
use crate::traits::{InvocationContext, NodeType};
use crate::NodeError;

fn forward_trigger_data(ctx: &InvocationContext) -> PortData {
    let items = main_items(&ctx.input);
    if items.is_empty() {
        main_port(vec![Item::empty()])
    } else {
        main_port(items.to_vec())
    }
}

macro_rules! trigger_node {
    ($name:ident, $identifier:literal, $display:literal, $kind:expr) => {
        pub struct $name {
            descriptor: NodeDescriptor,
        }

        impl $name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self {
                    descriptor: NodeDescriptor::trigger($identifier, $display, $kind),
                }
            }
        }

        #[async_trait]
        impl NodeType for $name {
            fn descriptor(&self) -> &NodeDescriptor {
                &self.descriptor
            }

            async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError> {
                Ok(forward_trigger_data(ctx))
            }
        }
    };
}

trigger_node!(ManualTrigger, "manualTrigger", "Manual Trigger", TriggerType::Manual);
trigger_node!(ScheduleTrigger, "scheduleTrigger", "Schedule Trigger", TriggerType::Schedule);
trigger_node!(WebhookTrigger, "webhookTrigger", "Webhook Trigger", TriggerType::Webhook);
