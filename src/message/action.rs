//! Outbound actions.
//!
//! An [`Action`] is a named request with headers and a generated ActionID.
//! Some actions answer with a `Response` followed by a list of events and a
//! closing "terminator" event; these are *causal* actions and their result is
//! only known once the terminator arrives.
//!
//! # Example
//!
//! ```ignore
//! use ami_client::message::{Action, Headers};
//!
//! let action = Action::new("SIPpeers", Headers::new())
//!     .on_complete(|result| println!("{:?}", result));
//! assert!(action.has_causal_events());
//! assert_eq!(action.causal_event_terminator_name().as_deref(), Some("peerlistcomplete"));
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use super::{Event, Headers, Message, Response};
use crate::error::Result;
use crate::protocol::CRLF;

/// Action names whose result is a sequence of events.
pub const CAUSAL_ACTION_NAMES: &[&str] = &[
    "queuestatus",
    "sippeers",
    "iaxpeers",
    "parkedcalls",
    "dahdishowchannels",
    "coreshowchannels",
    "dbget",
    "status",
    "agents",
    "konferencelist",
    "confbridgelist",
    "confbridgelistrooms",
];

/// Callback invoked exactly once when an action completes.
pub type Completion = Box<dyn FnOnce(Result<Response>) + Send + 'static>;

/// A client-issued request.
///
/// `name` is lowercased and, like `headers`, fixed at construction. The
/// ActionID is a fresh UUID. The completion callback fires once, either with
/// the terminal response or with the failure that ended the action.
pub struct Action {
    name: String,
    headers: Headers,
    action_id: String,
    response: Option<Message>,
    /// Events collected for a causal action, in arrival order.
    events: Vec<Event>,
    complete: bool,
    on_complete: Option<Completion>,
}

impl Action {
    /// Create an action with a fresh ActionID.
    pub fn new(name: impl AsRef<str>, headers: Headers) -> Self {
        Self {
            name: name.as_ref().to_lowercase(),
            headers,
            action_id: Uuid::new_v4().to_string(),
            response: None,
            events: Vec::new(),
            complete: false,
            on_complete: None,
        }
    }

    /// Set the completion callback.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Lowercased action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Headers sent after `Action` and `ActionID`.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Correlation id echoed by Asterisk.
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Terminal message once complete; for causal actions, the running
    /// response while events are still arriving.
    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    /// Check whether the action has completed.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Check whether this action answers with a list of events.
    pub fn has_causal_events(&self) -> bool {
        CAUSAL_ACTION_NAMES.contains(&self.name.as_str())
    }

    /// Lowercased name of the event that closes the causal event list.
    pub fn causal_event_terminator_name(&self) -> Option<String> {
        if !self.has_causal_events() {
            return None;
        }
        Some(match self.name.as_str() {
            "sippeers" | "iaxpeers" => "peerlistcomplete".to_string(),
            "konferencelist" => "conferencelistcomplete".to_string(),
            name => format!("{}complete", name),
        })
    }

    /// Check whether `event` closes this action's event list.
    pub fn is_terminator(&self, event: &Event) -> bool {
        self.causal_event_terminator_name()
            .is_some_and(|terminator| event.name().to_lowercase() == terminator)
    }

    /// Serialize to wire format.
    ///
    /// ```text
    /// Action: <name>\r\n
    /// ActionID: <id>\r\n
    /// <Key>: <Value>\r\n   (per header, in order)
    /// \r\n
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.headers.len() * 32);
        buf.put_slice(self.to_string().as_bytes());
        buf.freeze()
    }

    /// Check whether the running response has been attached.
    pub(crate) fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Attach the first `Response` of a causal action.
    pub(crate) fn attach_response(&mut self, response: Response) {
        self.response = Some(Message::Response(response));
    }

    /// Append an event to a causal action. Returns `true` if it was the terminator.
    pub(crate) fn push_event(&mut self, event: Event) -> bool {
        let terminator = self.is_terminator(&event);
        self.events.push(event);
        terminator
    }

    /// Finish a causal action with everything collected so far.
    pub(crate) fn complete_with_events(&mut self) {
        let mut response = match self.response.take() {
            Some(Message::Response(response)) => response,
            _ => Response::new(),
        };
        response.set_events(std::mem::take(&mut self.events));
        self.complete(Ok(response));
    }

    /// Mark complete and fire the callback. Later calls are ignored.
    pub(crate) fn complete(&mut self, result: Result<Response>) {
        if self.complete {
            return;
        }
        self.complete = true;
        self.response = match &result {
            Ok(response) => Some(Message::Response(response.clone())),
            Err(crate::AmiError::Action(error)) => Some(Message::Error(error.clone())),
            Err(_) => self.response.take(),
        };
        if let Some(callback) = self.on_complete.take() {
            callback(result);
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action: {}{}", self.name, CRLF)?;
        write!(f, "ActionID: {}{}", self.action_id, CRLF)?;
        write!(f, "{}{}", self.headers, CRLF)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("action_id", &self.action_id)
            .field("headers", &self.headers)
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
