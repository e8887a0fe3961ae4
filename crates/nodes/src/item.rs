//! The unit of data flowing across ports.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Name of the default data port.
pub const MAIN_PORT: &str = "main";

/// Back-reference from an output item to the input item it derives from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedItem {
    /// Index of the source item on the input port.
    pub item: usize,
    /// Index of the input port, when the node has several.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<usize>,
}

/// One unit of data on a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub json: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paired_item: Option<PairedItem>,
}

impl Item {
    pub fn from_json(json: Value) -> Self {
        Self {
            json,
            binary: None,
            paired_item: None,
        }
    }

    /// An item with an empty object payload.
    pub fn empty() -> Self {
        Self::from_json(json!({}))
    }
}

/// Items grouped by port name — the shape of node input and output.
pub type PortData = HashMap<String, Vec<Item>>;

/// Wrap items as the sole content of the main port.
pub fn main_port(items: Vec<Item>) -> PortData {
    HashMap::from([(MAIN_PORT.to_owned(), items)])
}

/// The items on the main port, if any.
pub fn main_items(data: &PortData) -> &[Item] {
    data.get(MAIN_PORT).map_or(&[], Vec::as_slice)
}
