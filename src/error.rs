//! Error taxonomy returned by the public operations.
//!
//! Every exit path of create/update/delete yields an [`IndexError`] with one
//! of the [`ErrorKind`] tags. Raw [`StoreError`]s are classified once, when
//! the saga wraps a store call, and kept as the error's source.

use crate::lock::LockError;
use crate::saga::{OperationLog, StepId};
use crate::store::StoreError;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Classified failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller input violates naming or template shape
    Validation,
    /// Target already exists, or a race was detected mid-operation
    Conflict,
    /// Required alias or index is missing
    NotFound,
    /// Another operation owns the logical name
    Locked,
    /// The operation overran its lease window
    Timeout,
    /// A cleanup step after the primary operation failed
    DependencyFailure,
    /// The index store could not be reached
    StoreUnavailable,
    /// The engine rejected a request for another reason
    Engine,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Locked => "locked",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DependencyFailure => "dependency_failure",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::Engine => "engine",
        }
    }

    /// HTTP-equivalent status code
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::Locked => 423,
            ErrorKind::Timeout => 504,
            ErrorKind::DependencyFailure => 424,
            ErrorKind::StoreUnavailable => 502,
            ErrorKind::Engine => 500,
        }
    }

    /// Whether a caller may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Locked | ErrorKind::StoreUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compensation that failed while undoing a committed step
#[derive(Debug, Clone, PartialEq, Error)]
#[error("rollback of {step} ({action}) failed: {source}")]
pub struct RollbackError {
    pub step: StepId,
    pub action: String,
    #[source]
    pub source: StoreError,
}

/// Error returned by `IndexManager` operations
#[derive(Debug, Error)]
#[error("{message}")]
pub struct IndexError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<StoreError>,
    rollback_errors: Vec<RollbackError>,
    ops: Option<OperationLog>,
}

impl IndexError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        IndexError {
            kind,
            message: message.into(),
            source: None,
            rollback_errors: Vec::new(),
            ops: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn locked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Locked, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyFailure, message)
    }

    /// Classify a store failure raised while performing `description`
    pub fn from_store(description: &str, err: StoreError) -> Self {
        let kind = match &err {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::AlreadyExists { .. } => ErrorKind::Conflict,
            StoreError::Unavailable(_) => ErrorKind::StoreUnavailable,
            StoreError::Rejected { .. } => ErrorKind::Engine,
        };
        IndexError {
            kind,
            message: format!("{}: {}", description, err),
            source: Some(err),
            rollback_errors: Vec::new(),
            ops: None,
        }
    }

    pub fn with_source(mut self, source: StoreError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_ops(mut self, ops: OperationLog) -> Self {
        self.ops = Some(ops);
        self
    }

    /// Prefix the message with additional context
    pub fn context(mut self, context: impl std::fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The classified store failure, when the error originated at the store
    pub fn store_error(&self) -> Option<&StoreError> {
        self.source.as_ref()
    }

    pub fn is_store_originated(&self) -> bool {
        self.source.is_some()
    }

    /// True when the store reported that `index` itself already existed
    pub fn cause_is_already_exists(&self, index: &str) -> bool {
        self.source
            .as_ref()
            .is_some_and(|err| err.is_already_exists_for(index))
    }

    pub fn rollback_errors(&self) -> &[RollbackError] {
        &self.rollback_errors
    }

    pub fn push_rollback_error(&mut self, err: RollbackError) {
        self.rollback_errors.push(err);
    }

    pub fn take_rollback_errors(&mut self) -> Vec<RollbackError> {
        std::mem::take(&mut self.rollback_errors)
    }

    /// Operation log snapshot taken when the operation failed
    pub fn ops(&self) -> Option<&OperationLog> {
        self.ops.as_ref()
    }

    /// HTTP-equivalent status; engine rejections keep the engine's status
    pub fn status_code(&self) -> u16 {
        match (self.kind, &self.source) {
            (ErrorKind::Engine, Some(StoreError::Rejected { status, .. })) if *status >= 400 => {
                *status
            }
            (kind, _) => kind.status_code(),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": self.kind.as_str(),
            "status": self.status_code(),
            "message": self.message,
        });
        if !self.rollback_errors.is_empty() {
            body["rollback_errors"] = Value::Array(
                self.rollback_errors
                    .iter()
                    .map(|e| Value::String(e.to_string()))
                    .collect(),
            );
        }
        if let Some(ops) = &self.ops {
            body["ops"] = ops.to_json();
        }
        body
    }
}

impl From<LockError> for IndexError {
    fn from(err: LockError) -> Self {
        let kind = match &err {
            LockError::Locked { .. } => ErrorKind::Locked,
            LockError::Gone { .. } => ErrorKind::NotFound,
            LockError::Unavailable(_) => ErrorKind::StoreUnavailable,
        };
        IndexError::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::OperationKind;

    #[test]
    fn test_store_errors_are_classified() {
        let cases = [
            (StoreError::not_found("alias [a]"), ErrorKind::NotFound),
            (StoreError::already_exists("a-1"), ErrorKind::Conflict),
            (StoreError::unavailable("No Living connections"), ErrorKind::StoreUnavailable),
            (StoreError::rejected(400, "mapper_parsing_exception"), ErrorKind::Engine),
        ];
        for (store_err, kind) in cases {
            let err = IndexError::from_store("Creating index a-1", store_err);
            assert_eq!(err.kind(), kind);
            assert!(err.is_store_originated());
            assert!(err.message().starts_with("Creating index a-1: "));
        }
    }

    #[test]
    fn test_engine_status_is_preserved() {
        let err = IndexError::from_store("x", StoreError::rejected(400, "bad"));
        assert_eq!(err.status_code(), 400);

        let err = IndexError::from_store("x", StoreError::rejected(0, "odd"));
        assert_eq!(err.status_code(), 500);

        assert_eq!(IndexError::locked("busy").status_code(), 423);
        assert_eq!(IndexError::timeout("slow").status_code(), 504);
    }

    #[test]
    fn test_rollback_errors_do_not_replace_cause() {
        let mut err = IndexError::from_store("Creating alias a", StoreError::unavailable("down"));
        err.push_rollback_error(RollbackError {
            step: StepId::CreateIndex,
            action: "delete index a-1".into(),
            source: StoreError::unavailable("down"),
        });

        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert_eq!(err.rollback_errors().len(), 1);
        let json = err.to_json();
        assert_eq!(json["error"], "store_unavailable");
        assert_eq!(json["rollback_errors"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_already_exists_cause() {
        let err = IndexError::from_store("x", StoreError::already_exists("a-1"));
        assert!(err.cause_is_already_exists("a-1"));
        assert!(!err.cause_is_already_exists("a-2"));
        assert!(!IndexError::conflict("x").cause_is_already_exists("a-1"));
    }

    #[test]
    fn test_lock_errors_convert() {
        let err: IndexError = LockError::Gone {
            key: "orders".into(),
            operation: OperationKind::Update,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.kind().is_retryable());
        assert!(ErrorKind::Locked.is_retryable());
    }
}
