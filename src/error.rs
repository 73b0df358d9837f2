/// Unified error handling for the replica set watchdog
///
/// Every failure the reconciliation loops can run into maps onto one of the
/// variants below. The loops use `is_recoverable()` to decide whether to
/// retry on the next poll tick, and `severity()` to pick a log level.

use std::fmt;
use thiserror::Error;

pub use crate::config::ConfigError;

/// Main error type for watchdog operations
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// Dial, ping or fetch failure against a replica set or a single mongod
    #[error("Connection error{}: {message}", replset_suffix(.replset))]
    Connection {
        replset: Option<String>,
        message: String,
    },

    /// The replica set refused a config write (version mismatch, reconfig in progress)
    #[error("Replica set config write rejected for {replset}: {message}")]
    PersistConflict { replset: String, message: String },

    /// The voting correction did not converge
    #[error("Replica set invariant violated for {replset}: {message}")]
    InvariantViolation { replset: String, message: String },

    /// The replica set already holds the maximum number of members
    #[error("Replica set {replset} is at capacity ({max_members} members), dropped {host}")]
    CapacityExceeded {
        replset: String,
        host: String,
        max_members: usize,
    },

    /// The server rejected the command for lack of privileges
    #[error("Not authorized: {message}")]
    NotAuthorized { message: String },

    /// The stop signal was observed while waiting
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Discovery source (scheduler / orchestrator API) errors
    #[error("Discovery source error: {message}")]
    Discovery { message: String },

    /// A task could not be resolved into a mongod
    #[error("Task error for {task}: {message}")]
    Task { task: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn replset_suffix(replset: &Option<String>) -> String {
    match replset {
        Some(name) => format!(" ({})", name),
        None => String::new(),
    }
}

/// Result type alias for watchdog operations
pub type WatchdogResult<T> = Result<T, WatchdogError>;

impl WatchdogError {
    /// Create a connection error that is not tied to a replica set
    pub fn connection<S: Into<String>>(message: S) -> Self {
        WatchdogError::Connection {
            replset: None,
            message: message.into(),
        }
    }

    /// Create a connection error for a replica set
    pub fn replset_connection<R: Into<String>, S: Into<String>>(replset: R, message: S) -> Self {
        WatchdogError::Connection {
            replset: Some(replset.into()),
            message: message.into(),
        }
    }

    pub fn persist_conflict<R: Into<String>, S: Into<String>>(replset: R, message: S) -> Self {
        WatchdogError::PersistConflict {
            replset: replset.into(),
            message: message.into(),
        }
    }

    pub fn invariant_violation<R: Into<String>, S: Into<String>>(replset: R, message: S) -> Self {
        WatchdogError::InvariantViolation {
            replset: replset.into(),
            message: message.into(),
        }
    }

    pub fn not_authorized<S: Into<String>>(message: S) -> Self {
        WatchdogError::NotAuthorized {
            message: message.into(),
        }
    }

    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        WatchdogError::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn discovery<S: Into<String>>(message: S) -> Self {
        WatchdogError::Discovery {
            message: message.into(),
        }
    }

    pub fn task<T: Into<String>, S: Into<String>>(task: T, message: S) -> Self {
        WatchdogError::Task {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (retried on the next poll)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WatchdogError::Connection { .. }
                | WatchdogError::PersistConflict { .. }
                | WatchdogError::CapacityExceeded { .. }
                | WatchdogError::Discovery { .. }
        )
    }

    /// Check if this error was caused by the stop signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WatchdogError::Cancelled { .. })
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WatchdogError::Config(_) => ErrorSeverity::Critical,
            WatchdogError::InvariantViolation { .. } => ErrorSeverity::Critical,
            WatchdogError::NotAuthorized { .. } => ErrorSeverity::Error,
            WatchdogError::Task { .. } => ErrorSeverity::Error,
            WatchdogError::Connection { .. } => ErrorSeverity::Warning,
            WatchdogError::PersistConflict { .. } => ErrorSeverity::Warning,
            WatchdogError::Discovery { .. } => ErrorSeverity::Warning,
            WatchdogError::CapacityExceeded { .. } => ErrorSeverity::Warning,
            WatchdogError::Cancelled { .. } => ErrorSeverity::Info,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
