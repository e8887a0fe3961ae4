//! `nodes` crate — the node-type contract, the registry, and the built-in
//! node library.
//!
//! Every node — built-in and plugin alike — implements [`NodeType`].  The
//! engine resolves parameters (expressions included) *before* invoking a
//! node, so implementations only ever see plain values.

pub mod builtin;
pub mod descriptor;
pub mod error;
pub mod item;
pub mod mock;
pub mod properties;
pub mod registry;
pub mod traits;

pub use descriptor::{CredentialDefinition, NodeDescriptor, TriggerType};
pub use error::NodeError;
pub use item::{Item, PortData, MAIN_PORT};
pub use properties::{validate_parameters, NodeProperty, PropertyKind};
pub use registry::NodeRegistry;
pub use traits::{Helpers, InvocationContext, NodeType};
