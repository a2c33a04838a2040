//! Protocol module - wire format and the incremental lexer.
//!
//! This module implements the text protocol spoken over the AMI socket:
//! - line classification and header splitting
//! - an incremental lexer tolerant of arbitrary read boundaries

mod lexer;
mod wire_format;

pub use lexer::{Lexed, Lexer, LexerDelegate};
pub use wire_format::{
    classify, find_crlf, parse_banner, split_header, Classifier, BANNER_PREFIX, CRLF,
    DEFAULT_PORT, END_COMMAND_MARKER, HEADER_SEPARATOR,
};
