//! Inbound message types.
//!
//! Asterisk sends three kinds of messages, told apart by their first line:
//! `Response: Success|Pong|Follows` become a [`Response`], `Response: Error`
//! becomes an [`ErrorResponse`], and `Event: <name>` becomes an [`Event`].
//! [`Message`] is the closed union the lexer hands to the correlator.

use super::Headers;

/// Header carrying the correlation id.
pub const ACTION_ID_HEADER: &str = "ActionID";

/// Header mirrored into [`ErrorResponse::message`].
pub const MESSAGE_HEADER: &str = "Message";

/// A non-event answer from Asterisk.
///
/// `text_body` is only present for `Response: Follows` and for immediate
/// (bare line) responses. `events` is only populated for causal actions.
#[derive(Debug, Clone, Default)]
pub struct Response {
    headers: Headers,
    text_body: Option<String>,
    events: Vec<Event>,
}

impl Response {
    /// Create an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a response with the given headers.
    pub fn with_headers(headers: Headers) -> Self {
        Self {
            headers,
            ..Self::default()
        }
    }

    /// Create a response carrying only a text body.
    pub fn with_text_body(body: impl Into<String>) -> Self {
        Self {
            text_body: Some(body.into()),
            ..Self::default()
        }
    }

    /// Get a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set a header.
    pub fn insert_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key, value);
    }

    /// The `ActionID` header, if any.
    pub fn action_id(&self) -> Option<&str> {
        self.headers.get(ACTION_ID_HEADER)
    }

    /// Free text payload of a Follows or immediate response.
    pub fn text_body(&self) -> Option<&str> {
        self.text_body.as_deref()
    }

    /// Check whether a text body is present (it may be empty).
    pub fn has_text_body(&self) -> bool {
        self.text_body.is_some()
    }

    /// Replace the text body.
    pub fn set_text_body(&mut self, body: impl Into<String>) {
        self.text_body = Some(body.into());
    }

    pub(crate) fn text_body_mut(&mut self) -> Option<&mut String> {
        self.text_body.as_mut()
    }

    /// Events collected for a causal action, in arrival order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Replace the collected events.
    pub fn set_events(&mut self, events: Vec<Event>) {
        self.events = events;
    }
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        self.headers == other.headers
    }
}

/// An asynchronous notification from Asterisk, e.g. `PeerEntry` or `Hangup`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    headers: Headers,
}

impl Event {
    /// Create an event with no headers.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_headers(name, Headers::new())
    }

    /// Create an event with the given headers.
    pub fn with_headers(name: impl Into<String>, headers: Headers) -> Self {
        Self {
            name: name.into(),
            headers,
        }
    }

    /// Event type as sent by Asterisk (case preserved).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set a header.
    pub fn insert_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key, value);
    }

    /// The `ActionID` header, if any.
    pub fn action_id(&self) -> Option<&str> {
        self.headers.get(ACTION_ID_HEADER)
    }
}

/// An AMI-level failure (`Response: Error`).
#[derive(Debug, Clone, Default)]
pub struct ErrorResponse {
    headers: Headers,
    message: Option<String>,
}

impl ErrorResponse {
    /// Create an empty error.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an error with the given headers.
    pub fn with_headers(headers: Headers) -> Self {
        let message = headers.get(MESSAGE_HEADER).map(str::to_owned);
        Self { headers, message }
    }

    /// Get a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set a header. Setting `Message` also updates [`message`](Self::message).
    pub fn insert_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if key == MESSAGE_HEADER {
            self.message = Some(value.clone());
        }
        self.headers.insert(key, value);
    }

    /// The `ActionID` header, if any.
    pub fn action_id(&self) -> Option<&str> {
        self.headers.get(ACTION_ID_HEADER)
    }

    /// Human readable failure reason.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl PartialEq for ErrorResponse {
    fn eq(&self, other: &Self) -> bool {
        self.headers == other.headers
    }
}

/// Any message the lexer can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Response(Response),
    Event(Event),
    Error(ErrorResponse),
}

impl Message {
    /// The `ActionID` header, if any.
    pub fn action_id(&self) -> Option<&str> {
        match self {
            Message::Response(r) => r.action_id(),
            Message::Event(e) => e.action_id(),
            Message::Error(e) => e.action_id(),
        }
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        match self {
            Message::Response(r) => r.headers(),
            Message::Event(e) => e.headers(),
            Message::Error(e) => e.headers(),
        }
    }

    /// Set a header on whichever variant this is.
    pub fn insert_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        match self {
            Message::Response(r) => r.insert_header(key, value),
            Message::Event(e) => e.insert_header(key, value),
            Message::Error(e) => e.insert_header(key, value),
        }
    }

    /// Check if this is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error(_))
    }
}
