//! Wire format constants and line-level parsing.
//!
//! AMI is a CRLF-delimited text protocol:
//! ```text
//! Asterisk Call Manager/<version>\r\n        (banner, once)
//! Response: Success|Pong|Follows|Error\r\n   (or Event: <name>)
//! Key: Value\r\n                             (zero or more)
//! \r\n                                       (end of message)
//! ```
//!
//! `Response: Follows` messages carry free text after their headers,
//! closed by a line containing `--END COMMAND--`.

/// Line terminator.
pub const CRLF: &str = "\r\n";

/// Start of the greeting line sent once by the server.
pub const BANNER_PREFIX: &str = "Asterisk Call Manager/";

/// Marker closing the text body of a `Response: Follows` message.
pub const END_COMMAND_MARKER: &str = "--END COMMAND--";

/// Separator between header key and value.
pub const HEADER_SEPARATOR: &str = ": ";

/// Default AMI TCP port.
pub const DEFAULT_PORT: u16 = 5038;

/// Kind of message announced by a classifier line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classifier {
    /// `Event: <name>`
    Event(String),
    /// `Response: Success`
    Success,
    /// `Response: Pong`
    Pong,
    /// `Response: Follows`
    Follows,
    /// `Response: Error`
    Error,
}

/// Classify the first line of a message (without its CRLF).
///
/// Matching is case-insensitive; spaces after the colon are optional.
pub fn classify(line: &str) -> Option<Classifier> {
    if let Some(name) = strip_prefix_ignore_case(line, "event:") {
        return Some(Classifier::Event(name.trim_start_matches(' ').to_string()));
    }

    let status = strip_prefix_ignore_case(line, "response:")?.trim_start_matches(' ');
    match status.to_ascii_lowercase().as_str() {
        "success" => Some(Classifier::Success),
        "pong" => Some(Classifier::Pong),
        "follows" => Some(Classifier::Follows),
        "error" => Some(Classifier::Error),
        _ => None,
    }
}

/// Split a `Key: Value` line (without its CRLF).
///
/// The key ends at the first `": "`. The value is left-trimmed only.
pub fn split_header(line: &str) -> Option<(&str, &str)> {
    let i = line.find(HEADER_SEPARATOR)?;
    Some((&line[..i], line[i + 1..].trim_start()))
}

/// Extract the version from a banner line (without its CRLF).
pub fn parse_banner(line: &str) -> Option<&str> {
    line.strip_prefix(BANNER_PREFIX)
}

/// Position of the first CRLF in `buf`.
pub fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF.as_bytes())
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}
