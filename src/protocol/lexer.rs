//! Incremental AMI lexer.
//!
//! Uses `bytes::BytesMut` to accumulate socket reads and emits fully formed
//! messages as soon as their terminating line is seen. Input can be split at
//! any byte boundary; an incomplete trailing line is kept for the next feed.
//!
//! State machine:
//! - `WaitingForClassifier`: between messages
//! - `ReadingHeaders`: inside a Success/Pong/Error/Event message
//! - `ReadingFollows`: inside a `Response: Follows` message (headers, then text)
//!
//! # Example
//!
//! ```ignore
//! use ami_client::protocol::Lexer;
//!
//! let mut lexer = Lexer::new();
//! let items = lexer.push(b"Response: Success\r\nActionID: 1\r\n\r\n").unwrap();
//! assert_eq!(items.len(), 1);
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{
    classify, find_crlf, parse_banner, split_header, Classifier, BANNER_PREFIX, CRLF,
    END_COMMAND_MARKER,
};
use crate::error::{AmiError, Result};
use crate::message::{ErrorResponse, Event, Message, Response};

/// Receiver of everything the lexer recognizes.
///
/// Hooks are called in stream order. An `Err` from a hook stops the current
/// feed and is returned from [`Lexer::feed`].
pub trait LexerDelegate {
    /// A response or event was parsed.
    fn message_received(&mut self, message: Message) -> Result<()>;

    /// A `Response: Error` was parsed.
    fn error_received(&mut self, error: ErrorResponse) -> Result<()>;

    /// A line could not be classified; it is dropped.
    fn syntax_error_encountered(&mut self, line: &str);
}

/// One item produced by [`Lexer::push`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lexed {
    Message(Message),
    SyntaxError(String),
}

impl LexerDelegate for Vec<Lexed> {
    fn message_received(&mut self, message: Message) -> Result<()> {
        self.push(Lexed::Message(message));
        Ok(())
    }

    fn error_received(&mut self, error: ErrorResponse) -> Result<()> {
        self.push(Lexed::Message(Message::Error(error)));
        Ok(())
    }

    fn syntax_error_encountered(&mut self, line: &str) {
        self.push(Lexed::SyntaxError(line.to_string()));
    }
}

#[derive(Debug)]
enum State {
    WaitingForClassifier,
    ReadingHeaders {
        message: Message,
    },
    /// `in_body` flips on the first line that is not a header.
    /// `--END COMMAND--` directly after the headers ends the message with an empty body.
    ReadingFollows {
        response: Response,
        in_body: bool,
    },
}

/// Incremental classifier turning a byte stream into AMI messages.
pub struct Lexer {
    buffer: BytesMut,
    state: State,
    /// True until the stream has proven whether it starts with a banner.
    banner_pending: bool,
    ami_version: Option<String>,
}

impl Lexer {
    /// Create a new lexer at the start of a stream.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: State::WaitingForClassifier,
            banner_pending: true,
            ami_version: None,
        }
    }

    /// Protocol version from the banner, once seen.
    pub fn ami_version(&self) -> Option<&str> {
        self.ami_version.as_deref()
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append `data` and hand every complete message to `delegate`.
    ///
    /// # Errors
    ///
    /// Returns [`AmiError::Parser`] on a line that fits no state, or the
    /// first error returned by a delegate hook.
    pub fn feed<D: LexerDelegate>(&mut self, data: &[u8], delegate: &mut D) -> Result<()> {
        self.buffer.extend_from_slice(data);

        if self.banner_pending && !self.consume_banner() {
            return Ok(());
        }

        let mut processed = 0;
        let mut result = Ok(());

        while let Some(end) = find_crlf(&self.buffer[processed..]) {
            let line = String::from_utf8_lossy(&self.buffer[processed..processed + end]).into_owned();
            processed += end + CRLF.len();

            if let Err(e) = self.process_line(&line, delegate) {
                result = Err(e);
                break;
            }
        }

        self.buffer.advance(processed);
        result
    }

    /// Feed `data` and collect everything recognized.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Lexed>> {
        let mut items = Vec::new();
        self.feed(data, &mut items)?;
        Ok(items)
    }

    /// Clear the buffer and any message in progress.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForClassifier;
    }

    /// Consume the banner if the stream starts with one.
    ///
    /// Returns `false` while there are too few bytes to decide.
    fn consume_banner(&mut self) -> bool {
        let prefix = BANNER_PREFIX.as_bytes();

        if self.buffer.len() < prefix.len() {
            if prefix.starts_with(&self.buffer) {
                return false;
            }
            self.banner_pending = false;
            return true;
        }

        if !self.buffer.starts_with(prefix) {
            self.banner_pending = false;
            return true;
        }

        let Some(end) = find_crlf(&self.buffer) else {
            return false;
        };

        let line = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
        if let Some(version) = parse_banner(&line) {
            tracing::debug!(version, "AMI banner received");
            self.ami_version = Some(version.to_string());
        }
        self.buffer.advance(end + CRLF.len());
        self.state = State::WaitingForClassifier;
        self.banner_pending = false;
        true
    }

    fn process_line<D: LexerDelegate>(&mut self, line: &str, delegate: &mut D) -> Result<()> {
        match std::mem::replace(&mut self.state, State::WaitingForClassifier) {
            State::WaitingForClassifier => self.start_message(line, delegate),

            State::ReadingHeaders { mut message } => {
                if line.is_empty() {
                    return match message {
                        Message::Error(error) => delegate.error_received(error),
                        other => delegate.message_received(other),
                    };
                }
                let (key, value) = split_header(line).ok_or_else(|| {
                    AmiError::Parser(format!("unexpected line inside a message: {:?}", line))
                })?;
                message.insert_header(key, value);
                self.state = State::ReadingHeaders { message };
                Ok(())
            }

            State::ReadingFollows {
                mut response,
                in_body,
            } => {
                if line.is_empty() || line.contains(END_COMMAND_MARKER) {
                    if in_body {
                        if let Some(body) = response.text_body_mut() {
                            chop(body);
                        }
                    }
                    return delegate.message_received(Message::Response(response));
                }

                if !in_body {
                    if let Some((key, value)) = split_header(line) {
                        response.insert_header(key, value);
                        self.state = State::ReadingFollows {
                            response,
                            in_body: false,
                        };
                        return Ok(());
                    }
                }

                if let Some(body) = response.text_body_mut() {
                    body.push_str(line);
                    body.push_str(CRLF);
                }
                self.state = State::ReadingFollows {
                    response,
                    in_body: true,
                };
                Ok(())
            }
        }
    }

    fn start_message<D: LexerDelegate>(&mut self, line: &str, delegate: &mut D) -> Result<()> {
        match classify(line) {
            Some(Classifier::Event(name)) => {
                self.state = State::ReadingHeaders {
                    message: Message::Event(Event::new(name)),
                };
            }
            Some(Classifier::Success) | Some(Classifier::Pong) => {
                self.state = State::ReadingHeaders {
                    message: Message::Response(Response::new()),
                };
            }
            Some(Classifier::Error) => {
                self.state = State::ReadingHeaders {
                    message: Message::Error(ErrorResponse::new()),
                };
            }
            Some(Classifier::Follows) => {
                self.state = State::ReadingFollows {
                    response: Response::with_text_body(String::new()),
                    in_body: false,
                };
            }
            None if line.is_empty() => {}
            None if line.contains(':') => delegate.syntax_error_encountered(line),
            None => {
                return delegate.message_received(Message::Response(Response::with_text_body(line)));
            }
        }
        Ok(())
    }
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop the final line terminator of an accumulated body.
fn chop(body: &mut String) {
    if body.ends_with(CRLF) {
        body.truncate(body.len() - CRLF.len());
    } else {
        body.pop();
    }
}
