use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::mpsc;

use config::ConfigError;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error taxonomy.
///
/// Planning-time errors (`Capability`, `Unplannable`, `Value`) fail fast
/// before any execution begins. Execution-time errors (`Source`, `Timeout`,
/// `Cancelled`) fail the query as a whole; no automatic retry is performed
/// here, and every failure carries its originating cause.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// An internal invariant was violated; indicates a planner bug, not a
    /// user error.
    Internal(String),
    /// A rewrite attempted to push a construct the target source cannot
    /// execute. Must never reach execution.
    Capability(String),
    /// A cross-source join that cannot be converted to a dependent join,
    /// e.g. its predicate is not a single equality. Surfaced to the caller
    /// as a query rejection identifying the offending join.
    Unplannable(String),
    /// A source/translator reported a failure while executing a sub-plan.
    Source(String),
    /// A sub-plan exceeded its allotted time. Propagates like `Source` but
    /// with a distinct kind so callers can tell retryable timeouts from
    /// hard failures.
    Timeout(String),
    /// The query was cancelled while in progress.
    Cancelled(String),
    /// Invalid input or registration data.
    Value(String),
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn capability(msg: impl Into<String>) -> Self {
        Error::Capability(msg.into())
    }

    pub fn unplannable(msg: impl Into<String>) -> Self {
        Error::Unplannable(msg.into())
    }

    pub fn source(msg: impl Into<String>) -> Self {
        Error::Source(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Error::Cancelled(msg.into())
    }

    pub fn value(msg: impl Into<String>) -> Self {
        Error::Value(msg.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(s) => write!(f, "internal error: {}", s),
            Error::Capability(s) => write!(f, "capability violation: {}", s),
            Error::Unplannable(s) => write!(f, "unplannable query: {}", s),
            Error::Source(s) => write!(f, "source execution error: {}", s),
            Error::Timeout(s) => write!(f, "timeout: {}", s),
            Error::Cancelled(s) => write!(f, "cancelled: {}", s),
            Error::Value(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::fmt::Error> for Error {
    fn from(err: std::fmt::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Value(err.to_string())
    }
}

impl<T> From<mpsc::SendError<T>> for Error {
    fn from(err: mpsc::SendError<T>) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<mpsc::RecvError> for Error {
    fn from(err: mpsc::RecvError) -> Self {
        Error::Internal(err.to_string())
    }
}
