//! TCP connection to the AMI port.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ami_client::transport::connect;
//!
//! let stream = connect("127.0.0.1", 5038, Some(Duration::from_secs(5))).await?;
//! ```

use std::io::ErrorKind;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{AmiError, Result};

/// Open a TCP connection, giving up after `timeout` if one is set.
///
/// Refused, unreachable and timed out connects are logged and returned as
/// errors; there is no retry.
pub async fn connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let attempt = TcpStream::connect((host, port));

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(host, port, "Timeout exceeded while trying to connect");
                return Err(AmiError::ConnectTimeout(limit));
            }
        },
        None => attempt.await,
    };

    let stream = result.map_err(|e| {
        match e.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::AddrNotAvailable => {
                tracing::error!(
                    host,
                    port,
                    "Connection failed due to {}. Check your config and the server.",
                    e
                );
            }
            _ => tracing::error!(host, port, "Connection failed: {}", e),
        }
        AmiError::Io(e)
    })?;

    stream.set_nodelay(true)?;
    tracing::debug!(host, port, "TCP connection established");
    Ok(stream)
}
