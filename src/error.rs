// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Unified error taxonomy for the core (spec §7).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity attached to a single validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One structured validation failure, renderable by an external UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub field: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn error(code: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            field: field.into(),
            severity: Severity::Error,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Error taxonomy shared by every component (spec §7).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("validation failed: {0:?}")]
    ValidationError(Vec<ValidationIssue>),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("permanent provider error: {0}")]
    Permanent(String),

    #[error("integrity error: {0}")]
    IntegrityError(String),
}

impl CoreError {
    /// True for the two classes the sync engine retries with backoff (§4.F, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::RateLimited(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            // SQLite's unique constraint failures surface as code 2067/1555.
            if db_err.code().as_deref() == Some("2067") || db_err.code().as_deref() == Some("1555")
            {
                return CoreError::Duplicate(db_err.message().to_string());
            }
        }
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Transient(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::IntegrityError(format!("json: {err}"))
    }
}

/// Serializes a unit-like enum to the bare string SQLite column value
/// expects. An enum that serializes to anything other than a JSON string
/// is a programming error, not a runtime condition, so this surfaces it
/// as `IntegrityError` rather than panicking.
pub fn enum_to_column<T: Serialize>(value: T) -> CoreResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(CoreError::IntegrityError(format!("expected string enum representation, got {other:?}"))),
    }
}
