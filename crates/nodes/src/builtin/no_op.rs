//! `noOp` — identity pass-through.

use async_trait::async_trait;

use crate::descriptor::NodeDescriptor;
use crate::item::{main_items, main_port, PortData};
use crate::traits::{InvocationContext, NodeType};
use crate::NodeError;

pub struct NoOp {
    descriptor: NodeDescriptor,
}

impl NoOp {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            descriptor: NodeDescriptor::new("noOp", "No Operation", 1).with_group(&["utility"]),
        }
    }
}

#[async_trait]
impl NodeType for NoOp {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError> {
        Ok(main_port(main_items(&ctx.input).to_vec()))
    }
}
