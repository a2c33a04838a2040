//! # ami-client
//!
//! Async Rust client for the Asterisk Manager Interface (AMI).
//!
//! AMI is a line-based text protocol over a long-lived TCP session. The
//! client sends named *actions*; the server answers with *responses*,
//! *errors* and *events*, each tagged with the ActionID of the action that
//! caused it, plus unsolicited events describing what happens on the PBX.
//!
//! ## Architecture
//!
//! - **Lexer** ([`protocol`]): incremental, chunk-boundary tolerant parser
//! - **Correlator** ([`correlator`]): matches responses and causal event
//!   lists back to in-flight actions, completing each exactly once
//! - **Connection** ([`connection`]): `Created → Started → Stopped` lifecycle
//! - **Client** ([`Client`]): tokio session task, writer task, and a cheap
//!   cloneable handle
//!
//! ## Example
//!
//! ```ignore
//! use ami_client::{Client, StreamEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ami_client::AmiError> {
//!     let (client, mut events) = Client::builder()
//!         .host("127.0.0.1")
//!         .credentials("admin", "amp111")
//!         .connect()
//!         .await?;
//!
//!     let version = client
//!         .send_action("Command", [("Command", "core show version")])
//!         .await?;
//!     println!("{}", version.text_body().unwrap_or_default());
//!
//!     while let Some(StreamEvent::Event(event)) = events.recv().await {
//!         println!("{}: {:?}", event.name(), event.headers());
//!     }
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod correlator;
pub mod error;
pub mod message;
pub mod options;
pub mod protocol;
pub mod transport;

mod client;
mod writer;

pub use client::{Client, ClientBuilder, EventStream};
pub use connection::{ConnectionState, Credentials, DisconnectReason, StreamEvent};
pub use error::{AmiError, Result};
pub use message::{Action, ErrorResponse, Event, Headers, Message, Response};
pub use options::ConnectOptions;
