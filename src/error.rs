//! Error types for parsing and building nginx configurations.
//!
//! Errors come in two flavors:
//!
//! - [`ParseError`]: a recoverable syntax or validation error tied to a
//!   source location. These are normally collected into the payload as
//!   data rather than aborting the parse.
//! - [`Error`]: the fatal error type returned by [`parse`](crate::parse)
//!   and friends: I/O failures, glob failures, and parse errors promoted
//!   to fatal by `stop_parsing_on_error`.

use std::fmt;
use std::io;
use thiserror::Error;

/// A syntax or validation error found while parsing a configuration.
///
/// Renders as `<message> in <file>:<line>` (or without the suffix parts
/// when they are unknown), which is also the string recorded in
/// [`ConfigError`](crate::ConfigError) and
/// [`PayloadError`](crate::PayloadError).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    message: String,
    file: Option<String>,
    line: Option<usize>,
}

impl ParseError {
    pub(crate) fn new(
        message: impl Into<String>,
        file: Option<String>,
        line: Option<usize>,
    ) -> Self {
        Self {
            message: message.into(),
            file,
            line,
        }
    }

    /// The error message without the file/line suffix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The file the error was found in, if known.
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// The 1-based line the error was found on, if known.
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    /// Fills in the file name on errors that were produced before one
    /// was known (lexer errors carry only a line).
    pub(crate) fn in_file(mut self, file: &str) -> Self {
        if self.file.is_none() {
            self.file = Some(file.to_string());
        }
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{} in {}:{}", self.message, file, line),
            (Some(file), None) => write!(f, "{} in {}", self.message, file),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ParseError {}

/// Fatal errors returned by [`parse`](crate::parse),
/// [`Payload::combined`](crate::Payload::combined), and the builders.
#[derive(Debug, Error)]
pub enum Error {
    /// A [`ParseError`] that aborted the parse, either because it hit an
    /// unrecoverable spot or because `stop_parsing_on_error` was set.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Failure opening or reading a configuration file.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// An include pattern was not a valid glob.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    /// The filesystem failed while expanding an include glob.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_file_and_line() {
        let err = ParseError::new(
            r#"unknown directive "foo""#,
            Some("/etc/nginx/nginx.conf".to_string()),
            Some(7),
        );
        assert_eq!(
            err.to_string(),
            r#"unknown directive "foo" in /etc/nginx/nginx.conf:7"#
        );
    }

    #[test]
    fn test_display_without_line() {
        let err = ParseError::new("something went wrong", Some("a.conf".to_string()), None);
        assert_eq!(err.to_string(), "something went wrong in a.conf");
    }

    #[test]
    fn test_in_file_keeps_existing() {
        let err = ParseError::new("oops", Some("a.conf".to_string()), Some(1)).in_file("b.conf");
        assert_eq!(err.file(), Some("a.conf"));

        let err = ParseError::new("oops", None, Some(1)).in_file("b.conf");
        assert_eq!(err.file(), Some("b.conf"));
    }
}
