// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Crate-level error type
//!
//! Entity validation problems are not errors in this sense: they are
//! accumulated on the entity and reported in the transaction response.
//! `SubmissionError` covers everything that aborts an operation.

use crate::index::IndexError;
use crate::storage::StorageError;
use thiserror::Error;

/// Error surfaced to the caller of a transaction entry point
#[derive(Error, Debug, Clone)]
pub enum SubmissionError {
    /// Caller-caused problem, echoed verbatim
    #[error("{message}")]
    User { message: String, code: u16 },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Authorization(String),

    /// Unexpected failure; details are logged, never shown to the caller
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SubmissionError {
    /// A 400 user error
    pub fn user(message: impl Into<String>) -> Self {
        SubmissionError::User {
            message: message.into(),
            code: 400,
        }
    }

    pub fn user_with_code(message: impl Into<String>, code: u16) -> Self {
        SubmissionError::User {
            message: message.into(),
            code,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SubmissionError::Internal(message.into())
    }

    /// HTTP-style status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            SubmissionError::User { code, .. } => *code,
            SubmissionError::NotFound(_) => 404,
            SubmissionError::Authorization(_) => 403,
            SubmissionError::Internal(_) => 500,
        }
    }

    /// Whether the error was caused by the caller rather than the system
    pub fn is_user_error(&self) -> bool {
        !matches!(self, SubmissionError::Internal(_))
    }

    /// Message that may be shown to the caller
    pub fn public_message(&self) -> String {
        match self {
            SubmissionError::Internal(_) => crate::transactions::MESSAGE_500.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StorageError> for SubmissionError {
    fn from(err: StorageError) -> Self {
        SubmissionError::Internal(format!("storage: {}", err))
    }
}

impl From<IndexError> for SubmissionError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::InvalidRequest(msg) => SubmissionError::user(msg),
            other => SubmissionError::Internal(format!("index service: {}", other)),
        }
    }
}

impl From<serde_json::Error> for SubmissionError {
    fn from(err: serde_json::Error) -> Self {
        SubmissionError::Internal(format!("serialization: {}", err))
    }
}

/// Result type for submission operations
pub type SubmissionResult<T> = Result<T, SubmissionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SubmissionError::user("bad").status_code(), 400);
        assert_eq!(SubmissionError::NotFound("x".into()).status_code(), 404);
        assert_eq!(SubmissionError::internal("boom").status_code(), 500);
        assert!(!SubmissionError::internal("boom").is_user_error());
    }

    #[test]
    fn test_internal_message_is_not_echoed() {
        let err = SubmissionError::internal("connection refused at 10.0.0.3");
        assert!(!err.public_message().contains("10.0.0.3"));
        assert_eq!(SubmissionError::user("bad doc").public_message(), "bad doc");
    }
}
