// ABOUTME: Unified error handling for the connector agent
// ABOUTME: Defines AppError, stable error codes and the AppResult alias used crate-wide
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Errors
//!
//! Every fallible operation in the agent returns [`AppResult`]. The
//! [`ErrorCode`] carried by an [`AppError`] is what ends up in serialized
//! command results, so its string form is part of the wire contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Stable error codes surfaced to operators and to the control plane
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed, unknown or checksum-mismatched API key
    AuthInvalid,
    /// Transport drop or handshake timeout
    ConnectionFailed,
    /// A non-SELECT statement was detected by the read-only guard
    SecurityViolation,
    /// Database-level failure while running a read
    ExecutionFailed,
    /// Vault, settings or queue write failure
    PersistenceFailed,
    /// A response could not be handed to the tunnel
    DeliveryFailed,
    /// Caller supplied invalid input
    InvalidInput,
    /// Requested resource does not exist
    ResourceNotFound,
    /// Configuration is missing or invalid
    ConfigError,
    /// A remote HTTP service failed
    ExternalServiceError,
    /// Local bookkeeping database failed
    DatabaseError,
    /// Unexpected internal failure
    InternalError,
}

impl ErrorCode {
    /// Wire representation of the code
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthInvalid => "AUTH_INVALID",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::PersistenceFailed => "PERSISTENCE_FAILED",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::ConfigError => "CONFIG_ERROR",
            Self::ExternalServiceError => "EXTERNAL_SERVICE_ERROR",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error with a stable code and a human readable message
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct AppError {
    /// Machine readable classification
    pub code: ErrorCode,
    /// Operator facing description
    pub message: String,
}

/// Result alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create an error with an explicit code
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// API key rejected locally or by the control plane
    #[must_use]
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthInvalid, message)
    }

    /// Tunnel could not be established or was lost
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    /// Read-only enforcement rejected a statement
    #[must_use]
    pub fn security_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SecurityViolation, message)
    }

    /// Target database failed while executing a read
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionFailed, message)
    }

    /// A durable write (vault, settings) failed
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PersistenceFailed, message)
    }

    /// Outbound send over the tunnel failed
    #[must_use]
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeliveryFailed, message)
    }

    /// Invalid caller input
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Missing resource
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceNotFound, message)
    }

    /// Invalid configuration
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Remote HTTP service failure
    #[must_use]
    pub fn external_service(service: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ExternalServiceError,
            format!("{service}: {}", message.into()),
        )
    }

    /// Local bookkeeping database failure
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Unexpected internal failure
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<io::Error> for AppError {
    fn from(e: io::Error) -> Self {
        Self::persistence(format!("I/O error: {e}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {e}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        Self::database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_code() {
        let err = AppError::security_violation("DROP detected");
        assert_eq!(err.to_string(), "SECURITY_VIOLATION: DROP detected");
    }

    #[test]
    fn test_error_code_serializes_as_wire_string() {
        let json = serde_json::to_string(&ErrorCode::ExecutionFailed).unwrap();
        assert_eq!(json, "\"EXECUTION_FAILED\"");
    }
}
