//! Message model - the values exchanged over an AMI session.
//!
//! - [`Action`]: outbound request, correlated by a generated ActionID
//! - [`Response`], [`Event`], [`ErrorResponse`]: inbound messages, unified
//!   by the closed [`Message`] enum
//! - [`Headers`]: ordered `Key: Value` pairs shared by all of the above

mod action;
mod headers;
mod response;

pub use action::{Action, Completion, CAUSAL_ACTION_NAMES};
pub use headers::Headers;
pub use response::{ErrorResponse, Event, Message, Response};
