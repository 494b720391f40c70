//! Error types for persistence and main-context hand-off.
//!
//! Validation problems (unknown group, duplicate create, deleting the
//! default) are never errors; they are reported through the outcome enums in
//! [`crate::outcome`]. Errors here describe infrastructure failing.

use thiserror::Error;

/// A failed persistence operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The backing store rejected or failed the operation.
    #[error("Database error during {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    /// A referential or uniqueness constraint was violated.
    #[error("Constraint violated during {operation}: {message}")]
    Constraint {
        operation: &'static str,
        message: String,
    },

    /// The caller passed a record that can never be stored.
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// The gateway has been closed or never connected.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn database(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Database {
            operation,
            message: message.into(),
        }
    }

    pub fn constraint(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Constraint {
            operation,
            message: message.into(),
        }
    }
}

/// A temporary term whose end lies past the last representable instant.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Term of {}s ends beyond the supported calendar", .0.as_secs())]
pub struct TermOutOfRange(pub std::time::Duration);

/// The main context stopped before a handed-off task could report back.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Main context is no longer accepting work")]
pub struct MainContextClosed;
