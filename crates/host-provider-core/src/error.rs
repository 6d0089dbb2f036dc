// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for host-provider-core.
//!
//! Every caller-facing operation fails with an [`Error`] whose
//! [`Error::error_code`] is stable and machine-checkable.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type using the host provider [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by a vendor back-end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider}: {message}")]
pub struct VendorError {
    /// Provider identifier that produced the failure.
    pub provider: String,
    /// Vendor-supplied detail.
    pub message: String,
    /// Whether repeating the call may succeed.
    pub retryable: bool,
    /// Whether the vendor reported the unit (or resource) as absent.
    pub not_found: bool,
}

impl VendorError {
    /// A transient failure (throttling, capacity, network).
    pub fn retryable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
            not_found: false,
        }
    }

    /// A failure that repeating the call will not fix.
    pub fn fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
            not_found: false,
        }
    }

    /// The vendor has no such unit.
    pub fn not_found(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
            not_found: true,
        }
    }
}

/// Host provider errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Credential, host, static IP, provider or vendor unit is missing.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up (`credential`, `host`, `static_ip`, ...).
        kind: &'static str,
        /// The key that was looked up.
        id: String,
    },

    /// Every zone of the ring is already used by a live host of the group.
    #[error("No free zone for group '{group}' after {attempts} attempts")]
    PlacementExhausted {
        /// Group being placed.
        group: String,
        /// Number of candidates examined.
        attempts: usize,
    },

    /// Vendor API failure.
    #[error("Vendor error: {0}")]
    Vendor(#[from] VendorError),

    /// Readiness polling budget exceeded. The unit is left in place.
    #[error(
        "Unit '{name}' in zone '{}' not ready after {attempts} attempts",
        .zone.as_deref().unwrap_or("-")
    )]
    ReadinessTimeout {
        /// Unit name, for manual or next-attempt cleanup.
        name: String,
        /// Zone the unit was created in.
        zone: Option<String>,
        /// Polls performed.
        attempts: u32,
    },

    /// Malformed caller input or credential content.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// Offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The vendor never reached the requested power state.
    #[error("Expected state '{expected}', vendor reports '{actual}'")]
    UnexpectedState {
        /// Target state.
        expected: String,
        /// Last observed state.
        actual: String,
    },

    /// The back-end does not implement the operation.
    #[error("Provider '{provider}' does not support {operation}")]
    Unsupported {
        /// Provider identifier.
        provider: String,
        /// Operation name.
        operation: &'static str,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`Error::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::Unsupported`].
    pub fn unsupported(provider: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            operation,
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::PlacementExhausted { .. } => "PLACEMENT_EXHAUSTED",
            Self::Vendor(_) => "VENDOR_ERROR",
            Self::ReadinessTimeout { .. } => "READINESS_TIMEOUT",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::UnexpectedState { .. } => "UNEXPECTED_STATE",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::Database(_) | Self::Migrate(_) => "DATABASE_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Only transient vendor failures are retried locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Vendor(e) if e.retryable)
    }

    /// Whether this is the vendor reporting an absent unit.
    pub fn is_vendor_not_found(&self) -> bool {
        matches!(self, Self::Vendor(e) if e.not_found)
    }
}
