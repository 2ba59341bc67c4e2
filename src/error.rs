//! Error kinds for parsing, caching, backend calls and whole translation runs.
//! Each variant carries the context a caller needs to branch on (file, line,
//! batch index) instead of a preformatted message.

use std::fmt;

use thiserror::Error;

/// Which rule a properties line broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatViolation {
    MissingSeparator,
    EmptyKey,
    EmptyValue,
}

impl fmt::Display for FormatViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatViolation::MissingSeparator => write!(f, "missing '=' separator"),
            FormatViolation::EmptyKey => write!(f, "empty key"),
            FormatViolation::EmptyValue => write!(f, "empty value"),
        }
    }
}

/// Malformed properties input. Fatal to the whole parse: no partial document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError {
    /// Source file name, when the content came from disk.
    pub file: Option<String>,
    /// 1-based line number of the offending line.
    pub line: usize,
    pub reason: FormatViolation,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{file}: ")?;
        }
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for FormatError {}

impl FormatError {
    pub fn new(line: usize, reason: FormatViolation) -> Self {
        Self {
            file: None,
            line,
            reason,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Failure of a single backend batch call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("empty batch")]
    EmptyInput,
    #[error("backend timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("unexpected status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Unexpected storage fault. Duplicate keys are not errors and never end up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(String),
    #[error("cache db error: {0}")]
    Db(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Db(e.to_string())
    }
}

/// Configuration could not be loaded or is out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid config value `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

/// Errors that abort a translation run and reach the caller.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error("batch {batch_index} failed: {source}")]
    Backend {
        batch_index: usize,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    CacheIo(#[from] CacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("translation run cancelled")]
    Cancelled,
    #[error("io error on {path}: {message}")]
    Io { path: String, message: String },
}

impl TranslateError {
    /// Whether running the same translation again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranslateError::Backend {
                source: BackendError::Timeout { .. }
                    | BackendError::RateLimited { .. }
                    | BackendError::Transport(_)
                    | BackendError::Http { .. },
                ..
            } | TranslateError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_error_mentions_file_and_line() {
        let err = FormatError::new(3, FormatViolation::EmptyValue).with_file("messages_en.properties");
        assert_eq!(err.to_string(), "messages_en.properties: line 3: empty value");

        let bare = FormatError::new(7, FormatViolation::MissingSeparator);
        assert_eq!(bare.to_string(), "line 7: missing '=' separator");
    }

    #[test]
    fn backend_timeouts_are_retryable_but_format_errors_are_not() {
        let timeout = TranslateError::Backend {
            batch_index: 0,
            source: BackendError::Timeout { after_ms: 100 },
        };
        assert!(timeout.is_retryable());

        let auth = TranslateError::Backend {
            batch_index: 2,
            source: BackendError::Auth("bad key".into()),
        };
        assert!(!auth.is_retryable());

        let format = TranslateError::from(FormatError::new(1, FormatViolation::EmptyKey));
        assert!(!format.is_retryable());
    }
}
