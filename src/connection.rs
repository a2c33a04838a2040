//! Connection lifecycle.
//!
//! [`Connection`] ties the lexer and the correlator to a transport and an
//! event sink. It is synchronous and owns all correlation state, so it must
//! be driven from one execution context (the session task in
//! [`client`](crate::client)).
//!
//! ```text
//! Created ──connected()──► Started ──closed() / fatal fault──► Stopped
//! ```
//!
//! Entering `Started` emits [`StreamEvent::Connected`] and logs in when
//! credentials are set. Entering `Stopped` fails every pending action with
//! [`AmiError::ConnectionClosed`] and emits [`StreamEvent::Disconnected`].

use std::fmt;

use tokio::sync::mpsc;

use crate::correlator::Correlator;
use crate::error::{AmiError, Result};
use crate::message::{Action, ErrorResponse, Event, Headers, Message};
use crate::protocol::{Lexer, LexerDelegate};
use crate::transport::Transport;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Started,
    Stopped,
}

/// Why a connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the socket.
    RemoteClosed,
    /// The client asked to close.
    LocalClosed,
    /// A transport or protocol fault.
    Error(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::RemoteClosed => write!(f, "closed by server"),
            DisconnectReason::LocalClosed => write!(f, "closed by client"),
            DisconnectReason::Error(e) => write!(f, "{}", e),
        }
    }
}

/// What the event sink receives.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected,
    Disconnected(DisconnectReason),
    Event(Event),
}

/// Receiver of lifecycle notifications and unsolicited events.
pub trait EventSink {
    fn deliver(&mut self, event: StreamEvent);
}

impl EventSink for Vec<StreamEvent> {
    fn deliver(&mut self, event: StreamEvent) {
        self.push(event);
    }
}

impl EventSink for mpsc::UnboundedSender<StreamEvent> {
    fn deliver(&mut self, event: StreamEvent) {
        if self.send(event).is_err() {
            tracing::warn!("event stream dropped, discarding event");
        }
    }
}

/// Login details sent as a `Login` action on connect.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
    /// Sent as `Events: On` or `Events: Off`.
    pub events: bool,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            events: true,
        }
    }

    fn login_action(&self) -> Action {
        let headers: Headers = [
            ("Username", self.username.as_str()),
            ("Secret", self.secret.as_str()),
            ("Events", if self.events { "On" } else { "Off" }),
        ]
        .into_iter()
        .collect();

        let username = self.username.clone();
        Action::new("Login", headers).on_complete(move |result| match result {
            Ok(_) => tracing::info!(username = %username, "Logged in"),
            Err(e) => tracing::error!(username = %username, "Login failed: {}", e),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("events", &self.events)
            .finish()
    }
}

/// One AMI session over one byte stream.
pub struct Connection<T, S> {
    state: ConnectionState,
    lexer: Lexer,
    correlator: Correlator,
    transport: T,
    sink: S,
    credentials: Option<Credentials>,
}

impl<T: Transport, S: EventSink> Connection<T, S> {
    /// Create a connection in the `Created` state.
    pub fn new(transport: T, sink: S, credentials: Option<Credentials>) -> Self {
        tracing::debug!("Starting up...");
        Self {
            state: ConnectionState::Created,
            lexer: Lexer::new(),
            correlator: Correlator::new(),
            transport,
            sink,
            credentials,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == ConnectionState::Started
    }

    pub fn is_stopped(&self) -> bool {
        self.state == ConnectionState::Stopped
    }

    /// Protocol version from the banner, once seen.
    pub fn ami_version(&self) -> Option<&str> {
        self.lexer.ami_version()
    }

    /// Number of actions awaiting completion.
    pub fn pending_actions(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The transport reported a successful connection.
    ///
    /// Only valid from `Created`; later calls are ignored.
    pub fn connected(&mut self) -> Result<()> {
        if self.state != ConnectionState::Created {
            return Ok(());
        }
        self.state = ConnectionState::Started;
        tracing::debug!("Connection started");
        self.sink.deliver(StreamEvent::Connected);

        let login = self.credentials.as_ref().map(|credentials| {
            tracing::debug!(username = %credentials.username, "Logging in");
            credentials.login_action()
        });
        if let Some(login) = login {
            self.dispatch(login)?;
        }
        Ok(())
    }

    /// Feed bytes received from the transport.
    ///
    /// A parser or correlation fault stops the connection and is returned.
    pub fn receive_data(&mut self, data: &[u8]) -> Result<()> {
        if self.is_stopped() {
            return Err(AmiError::ConnectionClosed);
        }
        tracing::trace!("[RECV] {}", String::from_utf8_lossy(data));

        let mut router = Router {
            correlator: &mut self.correlator,
            sink: &mut self.sink,
        };
        if let Err(e) = self.lexer.feed(data, &mut router) {
            tracing::error!("Fatal protocol error: {}", e);
            self.stop(DisconnectReason::Error(e.to_string()));
            return Err(e);
        }
        Ok(())
    }

    /// Send an action. Its callback fires once with the outcome.
    ///
    /// Returns the ActionID. On a stopped connection the callback receives
    /// [`AmiError::ConnectionClosed`] and the same error is returned. A
    /// transport that refuses the write stops the connection.
    pub fn dispatch(&mut self, mut action: Action) -> Result<String> {
        if self.is_stopped() {
            action.complete(Err(AmiError::ConnectionClosed));
            return Err(AmiError::ConnectionClosed);
        }
        let dispatched = self.correlator.dispatch(action, &mut self.transport);
        if let Err(e) = &dispatched {
            tracing::error!("Transport write failed: {}", e);
            self.stop(DisconnectReason::Error(e.to_string()));
        }
        dispatched
    }

    /// Deliver a caller-made event through the event sink.
    pub fn fire_event(&mut self, event: Event) {
        self.sink.deliver(StreamEvent::Event(event));
    }

    /// The transport closed or failed.
    pub fn closed(&mut self, reason: DisconnectReason) {
        self.stop(reason);
    }

    fn stop(&mut self, reason: DisconnectReason) {
        if self.is_stopped() {
            return;
        }
        tracing::debug!(reason = %reason, "Finalizing stream");
        self.state = ConnectionState::Stopped;
        self.correlator.fail_all();
        self.lexer.clear();
        self.sink.deliver(StreamEvent::Disconnected(reason));
    }
}

/// Lexer delegate routing messages through the correlator.
struct Router<'a, S> {
    correlator: &'a mut Correlator,
    sink: &'a mut S,
}

impl<S: EventSink> Router<'_, S> {
    fn route(&mut self, message: Message) -> Result<()> {
        tracing::trace!("[RECV] {:?}", message);
        if let Some(event) = self.correlator.on_message(message)? {
            self.sink.deliver(StreamEvent::Event(event));
        }
        Ok(())
    }
}

impl<S: EventSink> LexerDelegate for Router<'_, S> {
    fn message_received(&mut self, message: Message) -> Result<()> {
        self.route(message)
    }

    fn error_received(&mut self, error: ErrorResponse) -> Result<()> {
        self.route(Message::Error(error))
    }

    fn syntax_error_encountered(&mut self, line: &str) {
        tracing::error!("Encountered a syntax error. Ignoring chunk: {:?}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Response;
    use bytes::Bytes;
    use std::sync::mpsc as std_mpsc;

    type TestConnection = Connection<Vec<Bytes>, Vec<StreamEvent>>;

    fn started(credentials: Option<Credentials>) -> TestConnection {
        let mut connection = Connection::new(Vec::new(), Vec::new(), credentials);
        connection.connected().unwrap();
        connection
    }

    fn tracked(name: &str, headers: Headers) -> (Action, std_mpsc::Receiver<Result<Response>>) {
        let (tx, rx) = std_mpsc::channel();
        let action = Action::new(name, headers).on_complete(move |result| {
            let _ = tx.send(result);
        });
        (action, rx)
    }

    #[test]
    fn test_lifecycle_events() {
        let mut connection: TestConnection = Connection::new(Vec::new(), Vec::new(), None);
        assert_eq!(connection.state(), ConnectionState::Created);

        connection.connected().unwrap();
        assert!(connection.is_started());
        assert!(connection.transport().is_empty());

        connection.closed(DisconnectReason::RemoteClosed);
        assert!(connection.is_stopped());

        connection.connected().unwrap();
        assert!(connection.is_stopped());

        assert_eq!(
            connection.sink(),
            &vec![
                StreamEvent::Connected,
                StreamEvent::Disconnected(DisconnectReason::RemoteClosed)
            ]
        );
    }

    #[test]
    fn test_login_on_connect() {
        let connection = started(Some(Credentials::new("fred", "jones")));

        let sent = connection.transport();
        assert_eq!(sent.len(), 1);
        let text = String::from_utf8_lossy(&sent[0]).into_owned();
        assert!(text.starts_with("Action: login\r\nActionID: "));
        assert!(text.ends_with("\r\nUsername: fred\r\nSecret: jones\r\nEvents: On\r\n\r\n"));
        assert_eq!(connection.pending_actions(), 1);
    }

    #[test]
    fn test_login_event_mask_off() {
        let mut credentials = Credentials::new("fred", "jones");
        credentials.events = false;
        let connection = started(Some(credentials));

        let text = String::from_utf8_lossy(&connection.transport()[0]).into_owned();
        assert!(text.contains("Events: Off\r\n"));
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let debug = format!("{:?}", Credentials::new("fred", "jones"));
        assert!(debug.contains("fred"));
        assert!(!debug.contains("jones"));
    }

    #[test]
    fn test_response_completes_action() {
        let mut connection = started(None);
        let headers: Headers = [("Command", "RECORD FILE evil")].into_iter().collect();
        let (action, rx) = tracked("Command", headers);
        let id = connection.dispatch(action).unwrap();

        let expected = format!(
            "Action: command\r\nActionID: {}\r\nCommand: RECORD FILE evil\r\n\r\n",
            id
        );
        assert_eq!(&connection.transport()[0][..], expected.as_bytes());

        let reply = format!(
            "Response: Success\r\nActionID: {}\r\nMessage: Recording started\r\n\r\n",
            id
        );
        connection.receive_data(reply.as_bytes()).unwrap();

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.header("Message"), Some("Recording started"));
        assert!(connection.is_started());
    }

    #[test]
    fn test_causal_action_over_the_wire() {
        let mut connection = started(None);
        let (action, rx) = tracked("sippeers", Headers::new());
        let id = connection.dispatch(action).unwrap();

        let stream = format!(
            "Response: Success\r\nActionID: {id}\r\nMessage: Events to follow\r\n\r\n\
             Event: PeerEntry\r\nActionID: {id}\r\nChanneltype: SIP\r\nObjectName: usera\r\n\r\n\
             Event: PeerlistComplete\r\nEventList: Complete\r\nListItems: 2\r\nActionID: {id}\r\n\r\n"
        );
        connection.receive_data(stream.as_bytes()).unwrap();

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.header("Message"), Some("Events to follow"));
        let names: Vec<_> = response.events().iter().map(Event::name).collect();
        assert_eq!(names, vec!["PeerEntry", "PeerlistComplete"]);
        assert_eq!(response.events()[0].header("ObjectName"), Some("usera"));
        assert!(rx.try_recv().is_err());

        // Only the Connected notification reached the sink.
        assert_eq!(connection.sink().len(), 1);
    }

    #[test]
    fn test_error_does_not_stop_connection() {
        let mut connection = started(None);
        let (action, rx) = tracked("status", Headers::new());
        let id = connection.dispatch(action).unwrap();

        let reply = format!("Response: Error\r\nActionID: {}\r\nMessage: Action failed\r\n\r\n", id);
        connection.receive_data(reply.as_bytes()).unwrap();

        let err = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Action failed: Action failed");
        assert!(connection.is_started());
    }

    #[test]
    fn test_unsolicited_event_goes_to_sink() {
        let mut connection = started(None);
        connection
            .receive_data(b"Event: Hangup\r\nChannel: SIP/101-3f3f\r\nUniqueid: 1094154427.10\r\nCause: 0\r\n\r\n")
            .unwrap();

        let expected: Headers = [
            ("Channel", "SIP/101-3f3f"),
            ("Uniqueid", "1094154427.10"),
            ("Cause", "0"),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            connection.sink(),
            &vec![
                StreamEvent::Connected,
                StreamEvent::Event(Event::with_headers("Hangup", expected))
            ]
        );
    }

    #[test]
    fn test_unknown_action_id_stops_connection() {
        let mut connection = started(None);
        let (action, rx) = tracked("ping", Headers::new());
        connection.dispatch(action).unwrap();

        let result = connection.receive_data(b"Response: Success\r\nActionID: bogus\r\n\r\n");

        assert!(matches!(result, Err(AmiError::UnknownActionId(_))));
        assert!(connection.is_stopped());
        assert!(matches!(rx.try_recv(), Ok(Err(AmiError::ConnectionClosed))));
        assert!(matches!(
            connection.sink().last(),
            Some(StreamEvent::Disconnected(DisconnectReason::Error(_)))
        ));
        assert!(matches!(
            connection.receive_data(b"\r\n"),
            Err(AmiError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_syntax_error_keeps_connection() {
        let mut connection = started(None);
        connection.receive_data(b"garbled: : line\r\n").unwrap();
        assert!(connection.is_started());

        connection.receive_data(b"Event: FullyBooted\r\n\r\n").unwrap();
        assert_eq!(connection.sink().len(), 2);
    }

    #[test]
    fn test_close_fails_causal_action_mid_aggregation() {
        let mut connection = started(None);
        let (action, rx) = tracked("queuestatus", Headers::new());
        let id = connection.dispatch(action).unwrap();

        let partial = format!(
            "Response: Success\r\nActionID: {id}\r\n\r\nEvent: QueueParams\r\nActionID: {id}\r\n\r\n"
        );
        connection.receive_data(partial.as_bytes()).unwrap();
        connection.closed(DisconnectReason::RemoteClosed);

        assert!(matches!(rx.try_recv(), Ok(Err(AmiError::ConnectionClosed))));
        assert_eq!(connection.pending_actions(), 0);
    }

    #[test]
    fn test_dispatch_after_stop() {
        let mut connection = started(None);
        connection.closed(DisconnectReason::LocalClosed);

        let (action, rx) = tracked("ping", Headers::new());
        assert!(matches!(
            connection.dispatch(action),
            Err(AmiError::ConnectionClosed)
        ));
        assert!(matches!(rx.try_recv(), Ok(Err(AmiError::ConnectionClosed))));
        assert!(connection.transport().is_empty());
    }

    struct ClosedTransport;

    impl Transport for ClosedTransport {
        fn write(&mut self, _data: Bytes) -> Result<()> {
            Err(AmiError::ConnectionClosed)
        }
    }

    #[test]
    fn test_failed_write_stops_connection() {
        let mut connection = Connection::new(ClosedTransport, Vec::new(), None);
        connection.connected().unwrap();

        let (action, rx) = tracked("ping", Headers::new());
        assert!(connection.dispatch(action).is_err());

        assert!(matches!(rx.try_recv(), Ok(Err(AmiError::ConnectionClosed))));
        assert!(connection.is_stopped());
        assert_eq!(connection.pending_actions(), 0);
        assert!(matches!(
            connection.sink().last(),
            Some(StreamEvent::Disconnected(DisconnectReason::Error(_)))
        ));
    }

    #[test]
    fn test_failed_login_write_stops_connection() {
        let mut connection = Connection::new(
            ClosedTransport,
            Vec::new(),
            Some(Credentials::new("fred", "jones")),
        );

        assert!(connection.connected().is_err());
        assert!(connection.is_stopped());
        assert_eq!(connection.sink().len(), 2);
    }

    #[test]
    fn test_banner_version() {
        let mut connection = started(None);
        connection.receive_data(b"Asterisk Call Manager/1.1\r\n").unwrap();
        assert_eq!(connection.ami_version(), Some("1.1"));
    }

    #[test]
    fn test_fire_event() {
        let mut connection = started(None);
        connection.fire_event(Event::new("Custom"));
        assert_eq!(connection.sink()[1], StreamEvent::Event(Event::new("Custom")));
    }
}
