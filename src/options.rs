//! Connection options.
//!
//! [`ConnectOptions`] can be built in code or deserialized from any serde
//! format; missing fields take their defaults.
//!
//! ```ignore
//! let options: ConnectOptions = serde_json::from_str(r#"{
//!     "host": "pbx.example.com",
//!     "username": "admin",
//!     "secret": "amp111",
//!     "connect_timeout_ms": 5000
//! }"#)?;
//! ```

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::connection::Credentials;
use crate::protocol::DEFAULT_PORT;

/// Default socket read size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Default capacity of the client-to-session command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Settings for one AMI connection.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Login is sent only when both `username` and `secret` are set.
    pub username: Option<String>,
    pub secret: Option<String>,
    /// Subscribe to events on login (`Events: On`).
    pub events: bool,
    /// TCP connect timeout; `0` waits indefinitely.
    pub connect_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub command_capacity: usize,
}

impl ConnectOptions {
    /// Connect timeout, if any.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// Login credentials, if both username and secret are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.secret) {
            (Some(username), Some(secret)) => {
                let mut credentials = Credentials::new(username.as_str(), secret.as_str());
                credentials.events = self.events;
                Some(credentials)
            }
            _ => None,
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: None,
            secret: None,
            events: true,
            connect_timeout_ms: 0,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("events", &self.events)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("command_capacity", &self.command_capacity)
            .finish()
    }
}
