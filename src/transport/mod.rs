//! Transport module - the byte pipe under an AMI session.
//!
//! Provides:
//! - [`Transport`]: where serialized actions go
//! - TCP connect with an optional timeout

mod tcp;

use bytes::Bytes;

use crate::error::Result;

pub use tcp::connect;

/// Outbound side of the connection.
///
/// `write` must not block; data is handed off and sent in order.
pub trait Transport {
    /// Queue `data` for sending.
    fn write(&mut self, data: Bytes) -> Result<()>;
}

/// Records writes; handy for driving a connection without a socket.
impl Transport for Vec<Bytes> {
    fn write(&mut self, data: Bytes) -> Result<()> {
        self.push(data);
        Ok(())
    }
}
