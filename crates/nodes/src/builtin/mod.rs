//! Built-in node library.

mod delay;
mod http_request;
mod if_else;
mod json_parse;
mod no_op;
mod set;
mod triggers;

pub use delay::Delay;
pub use http_request::HttpRequest;
pub use if_else::IfElse;
pub use json_parse::JsonParse;
pub use no_op::NoOp;
pub use set::Set;
pub use triggers::{ManualTrigger, ScheduleTrigger, WebhookTrigger};
