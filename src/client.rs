//! Client builder and session loop.
//!
//! The [`ClientBuilder`] configures and opens a connection. The session runs
//! on its own task, which owns the lexer and the correlation tables:
//! 1. Connect (or take a caller-supplied stream)
//! 2. Spawn the writer task for the write half
//! 3. Enter `Started`, log in if credentials are set
//! 4. Read bytes and commands until the socket closes or `close()` is called
//!
//! [`Client`] is a cheap handle for sending actions from any task;
//! [`EventStream`] yields lifecycle notifications and unsolicited events.
//!
//! # Example
//!
//! ```ignore
//! use ami_client::{Client, Headers};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client, mut events) = Client::builder()
//!         .host("127.0.0.1")
//!         .credentials("admin", "amp111")
//!         .connect()
//!         .await?;
//!
//!     let peers = client.send_action("SIPpeers", Headers::new()).await?;
//!     for peer in peers.events() {
//!         println!("{:?}", peer.header("ObjectName"));
//!     }
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionState, DisconnectReason, StreamEvent};
use crate::error::{AmiError, Result};
use crate::message::{Action, Event, Response};
use crate::options::ConnectOptions;
use crate::transport;
use crate::writer::{spawn_writer_task, WriterHandle};

/// Requests from [`Client`] handles to the session task.
enum Command {
    Dispatch(Action),
    InjectEvent(Event),
    Close,
}

/// Builder for configuring and opening an AMI connection.
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    options: ConnectOptions,
}

impl ClientBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing options.
    pub fn from_options(options: ConnectOptions) -> Self {
        Self { options }
    }

    /// Server host name or address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    /// Server port.
    ///
    /// Default: 5038
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Log in with these credentials as soon as the connection starts.
    pub fn credentials(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.options.username = Some(username.into());
        self.options.secret = Some(secret.into());
        self
    }

    /// Whether the login subscribes to events.
    ///
    /// Default: true
    pub fn events(mut self, enabled: bool) -> Self {
        self.options.events = enabled;
        self
    }

    /// Give up connecting after `timeout`.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Size of each socket read.
    ///
    /// Default: 4096
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.options.read_buffer_size = size;
        self
    }

    /// Capacity of the command channel shared by all [`Client`] handles.
    ///
    /// Default: 256
    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.options.command_capacity = capacity;
        self
    }

    /// Open a TCP connection and start the session.
    pub async fn connect(self) -> Result<(Client, EventStream)> {
        let stream = transport::connect(
            &self.options.host,
            self.options.port,
            self.options.connect_timeout(),
        )
        .await?;
        Ok(self.start(stream))
    }

    /// Start the session over an already connected stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S>(self, stream: S) -> (Client, EventStream)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(self.options.command_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Created);
        let version = Arc::new(OnceLock::new());

        let session = Session {
            connection: Connection::new(writer, events_tx, self.options.credentials()),
            commands: commands_rx,
            state: state_tx,
            version: version.clone(),
        };
        let read_buffer_size = self.options.read_buffer_size.max(1);

        tokio::spawn(async move {
            if let Err(e) = session.run(reader, writer_task, read_buffer_size).await {
                tracing::error!("Session ended with error: {}", e);
            }
        });

        let client = Client {
            commands: commands_tx,
            state: state_rx,
            version,
        };
        (client, EventStream { rx: events_rx })
    }
}

/// Handle to a running AMI session.
///
/// Clone freely; all clones talk to the same session.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    version: Arc<OnceLock<String>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Send an action and wait for its outcome.
    ///
    /// Causal actions (e.g. `SIPpeers`) resolve once their terminator event
    /// arrives, with the events in [`Response::events`]. `Response: Error`
    /// resolves to [`AmiError::Action`].
    pub async fn send_action<H, K, V>(&self, name: &str, headers: H) -> Result<Response>
    where
        H: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (action, rx) = awaitable(Action::new(name, headers.into_iter().collect()));
        self.dispatch(action).await?;
        rx.await.map_err(|_| AmiError::ConnectionClosed)?
    }

    /// Blocking variant of [`send_action`](Self::send_action).
    ///
    /// For use outside async code; panics if called on a runtime thread.
    pub fn send_action_blocking<H, K, V>(&self, name: &str, headers: H) -> Result<Response>
    where
        H: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (action, rx) = awaitable(Action::new(name, headers.into_iter().collect()));
        if let Err(mpsc::error::SendError(command)) =
            self.commands.blocking_send(Command::Dispatch(action))
        {
            reject(command);
            return Err(AmiError::ConnectionClosed);
        }
        rx.blocking_recv().map_err(|_| AmiError::ConnectionClosed)?
    }

    /// Send a prepared action; its callback reports the outcome.
    ///
    /// Returns the ActionID once the action is queued.
    pub async fn dispatch(&self, action: Action) -> Result<String> {
        let id = action.action_id().to_string();
        if let Err(mpsc::error::SendError(command)) =
            self.commands.send(Command::Dispatch(action)).await
        {
            reject(command);
            return Err(AmiError::ConnectionClosed);
        }
        Ok(id)
    }

    /// Push an event of our own into the event stream.
    pub async fn inject_event(&self, event: Event) -> Result<()> {
        self.commands
            .send(Command::InjectEvent(event))
            .await
            .map_err(|_| AmiError::ConnectionClosed)
    }

    /// Stop the session. Pending actions fail with [`AmiError::ConnectionClosed`].
    pub async fn close(&self) {
        if self.commands.send(Command::Close).await.is_err() {
            tracing::debug!("close requested on a finished session");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_started(&self) -> bool {
        self.state() == ConnectionState::Started
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ConnectionState::Stopped
    }

    /// Protocol version announced by the server banner.
    pub fn ami_version(&self) -> Option<String> {
        self.version.get().cloned()
    }

    /// Wait until the session has stopped.
    pub async fn wait_for_shutdown(&self) {
        let mut state = self.state.clone();
        loop {
            if *state.borrow_and_update() == ConnectionState::Stopped {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Lifecycle notifications and unsolicited events, in arrival order.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl EventStream {
    /// Next event; `None` once the session is gone and the stream is drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Next event if one is ready.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }
}

/// Attach a oneshot completion to `action`.
fn awaitable(action: Action) -> (Action, oneshot::Receiver<Result<Response>>) {
    let (tx, rx) = oneshot::channel();
    let action = action.on_complete(move |result| {
        let _ = tx.send(result);
    });
    (action, rx)
}

/// Resolve an action that never reached the session.
fn reject(command: Command) {
    if let Command::Dispatch(mut action) = command {
        action.complete(Err(AmiError::ConnectionClosed));
    }
}

/// The task owning one connection.
struct Session {
    connection: Connection<WriterHandle, mpsc::UnboundedSender<StreamEvent>>,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
    version: Arc<OnceLock<String>>,
}

impl Session {
    async fn run<R>(
        mut self,
        mut reader: R,
        mut writer_task: JoinHandle<Result<()>>,
        read_buffer_size: usize,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let started = self.connection.connected();
        self.publish();
        if let Err(e) = started {
            self.finish(DisconnectReason::Error(e.to_string()));
            return Err(e);
        }

        let mut buf = vec![0u8; read_buffer_size];

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::info!("Client socket closed!");
                        self.finish(DisconnectReason::RemoteClosed);
                        return Ok(());
                    }
                    Ok(n) => {
                        if let Err(e) = self.connection.receive_data(&buf[..n]) {
                            self.finish(DisconnectReason::Error(e.to_string()));
                            return Err(e);
                        }
                        self.publish();
                    }
                    Err(e) => {
                        tracing::error!("Socket read failed: {}", e);
                        self.finish(DisconnectReason::Error(e.to_string()));
                        return Err(AmiError::Io(e));
                    }
                },
                Some(command) = self.commands.recv() => match command {
                    Command::Dispatch(action) => {
                        // Failures reach the caller through the action's callback.
                        if let Err(e) = self.connection.dispatch(action) {
                            if self.connection.is_stopped() {
                                self.finish(DisconnectReason::Error(e.to_string()));
                                return Err(e);
                            }
                        }
                    }
                    Command::InjectEvent(event) => self.connection.fire_event(event),
                    Command::Close => {
                        self.finish(DisconnectReason::LocalClosed);
                        return Ok(());
                    }
                },
                // The writer only ends early when the socket refuses a write.
                finished = &mut writer_task => {
                    let error = match finished {
                        Ok(Ok(())) => AmiError::ConnectionClosed,
                        Ok(Err(e)) => e,
                        Err(e) => AmiError::Io(e.into()),
                    };
                    tracing::error!("Writer stopped: {}", error);
                    self.finish(DisconnectReason::Error(error.to_string()));
                    return Err(error);
                }
            }
        }
    }

    /// Stop the connection and reject commands that will never be read.
    fn finish(&mut self, reason: DisconnectReason) {
        self.connection.closed(reason);
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            reject(command);
        }
        self.publish();
    }

    /// Mirror state and version to the client handles.
    fn publish(&self) {
        let current = self.connection.state();
        self.state.send_if_modified(|state| {
            if *state == current {
                return false;
            }
            *state = current;
            true
        });

        if self.version.get().is_none() {
            if let Some(version) = self.connection.ami_version() {
                let _ = self.version.set(version.to_string());
            }
        }
    }
}
