//! Error types for the Gantry control plane
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the resource kind or context it relates to, and
//! `is_retryable()` drives controller requeue decisions.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Gantry operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The requested resource does not exist
    #[error("{kind} not found")]
    NotFound {
        /// Resource kind that was looked up (e.g. "App", "Space")
        kind: String,
    },

    /// The caller is not allowed to access the resource
    #[error("{kind} forbidden")]
    Forbidden {
        /// Resource kind the caller was denied on
        kind: String,
    },

    /// More than one object matched a lookup that must be unique
    ///
    /// This is a correctness invariant violation, never expected in healthy
    /// operation. It must not be resolved by picking one of the duplicates.
    #[error("duplicate {kind} records exist")]
    DuplicateRecords {
        /// Resource kind with duplicate records
        kind: String,
    },

    /// A lookup returned an object without a namespace (or name)
    #[error("{kind} is not namespace-scoped")]
    NotNamespaceScoped {
        /// Resource kind that lacked a namespace
        kind: String,
    },

    /// Validation error for API inputs or CRD specs
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// The external broker reported a terminal failure
    ///
    /// Requires operator intervention (or a spec change) to recover;
    /// controllers must not requeue on this.
    #[error("external operation failed [{reason}]: {message}")]
    ExternalOperationFailed {
        /// Machine-readable reason (mirrors the failure condition reason)
        reason: String,
        /// Human-readable description from the broker
        message: String,
    },

    /// A bounded wait elapsed before the awaited condition appeared
    ///
    /// Distinct from `ExternalOperationFailed`: the object may still be
    /// progressing, the caller just stopped waiting.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout {
        /// What was being awaited (e.g. "condition Ready on binding abc")
        what: String,
        /// The deadline that elapsed
        after: std::time::Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "reconciler", "client-factory")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given resource kind
    pub fn not_found(kind: impl Into<String>) -> Self {
        Self::NotFound { kind: kind.into() }
    }

    /// Create a forbidden error for the given resource kind
    pub fn forbidden(kind: impl Into<String>) -> Self {
        Self::Forbidden { kind: kind.into() }
    }

    /// Create a duplicate-records error for the given resource kind
    pub fn duplicate_records(kind: impl Into<String>) -> Self {
        Self::DuplicateRecords { kind: kind.into() }
    }

    /// Create a not-namespace-scoped error for the given resource kind
    pub fn not_namespace_scoped(kind: impl Into<String>) -> Self {
        Self::NotNamespaceScoped { kind: kind.into() }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an external-operation failure with reason and message
    pub fn external_operation_failed(
        reason: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ExternalOperationFailed {
            reason: reason.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error describing what was awaited
    pub fn timeout(what: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Map a kube API error into the Gantry taxonomy for the given kind
    ///
    /// 404 becomes `NotFound` and 403 becomes `Forbidden`, so the store's own
    /// access check surfaces the same way as the permissions layer. Everything
    /// else stays a `Kube` error.
    pub fn from_kube(err: kube::Error, kind: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ref ae) if ae.code == 404 => Self::not_found(kind),
            kube::Error::Api(ref ae) if ae.code == 403 => Self::forbidden(kind),
            other => Self::Kube { source: other },
        }
    }

    /// Check if this error is retryable
    ///
    /// Transient infrastructure errors (5xx, transport failures) retry with
    /// backoff. Anything requiring a spec change or a human decision does not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry transient K8s errors (connection, timeout, 409, 5xx).
                // Don't retry 4xx other than conflict.
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
                )
            }
            Error::NotFound { .. } => false,
            Error::Forbidden { .. } => false,
            Error::DuplicateRecords { .. } => false,
            Error::NotNamespaceScoped { .. } => false,
            Error::Validation { .. } => false,
            Error::ExternalOperationFailed { .. } => false,
            Error::Timeout { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the resource kind if this error is associated with one
    pub fn kind(&self) -> Option<&str> {
        match self {
            Error::NotFound { kind } => Some(kind),
            Error::Forbidden { kind } => Some(kind),
            Error::DuplicateRecords { kind } => Some(kind),
            Error::NotNamespaceScoped { kind } => Some(kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        })
    }

    /// Story: GUID lookups that match nothing surface as NotFound
    #[test]
    fn story_missing_resource_becomes_not_found() {
        let err = Error::not_found("App");
        assert!(err.to_string().contains("App not found"));
        assert_eq!(err.kind(), Some("App"));
        assert!(!err.is_retryable());
    }

    /// Story: duplicate GUIDs are a fatal invariant violation, never retried
    #[test]
    fn story_duplicate_records_are_fatal() {
        let err = Error::duplicate_records("ServiceInstance");
        assert!(err.to_string().contains("duplicate ServiceInstance"));
        assert!(!err.is_retryable());
    }

    /// Story: the store's own 404/403 map into the same taxonomy the
    /// resolver and permissions layer use
    #[test]
    fn story_kube_errors_map_into_taxonomy() {
        let err = Error::from_kube(api_error(404), "App");
        assert!(matches!(err, Error::NotFound { .. }));

        let err = Error::from_kube(api_error(403), "App");
        assert!(matches!(err, Error::Forbidden { .. }));

        let err = Error::from_kube(api_error(500), "App");
        assert!(matches!(err, Error::Kube { .. }));
    }

    /// Story: version conflicts and server errors retry; client errors don't
    #[test]
    fn story_retryability_follows_http_class() {
        assert!(Error::from(api_error(409)).is_retryable());
        assert!(Error::from(api_error(500)).is_retryable());
        assert!(Error::from(api_error(503)).is_retryable());
        assert!(!Error::from(api_error(400)).is_retryable());
        assert!(!Error::from(api_error(422)).is_retryable());
    }

    /// Story: broker-side failure is terminal, a timeout is not a failure
    #[test]
    fn story_broker_failure_vs_timeout() {
        let failed = Error::external_operation_failed("BindingFailed", "plan gone");
        assert!(!failed.is_retryable());
        assert!(failed.to_string().contains("BindingFailed"));
        assert!(failed.to_string().contains("plan gone"));

        let timeout = Error::timeout("condition Ready on binding b-1", Duration::from_secs(120));
        assert!(!timeout.is_retryable());
        assert!(timeout.to_string().contains("condition Ready"));
        // Callers must be able to tell "still working" from "broker says no"
        assert!(matches!(timeout, Error::Timeout { .. }));
        assert!(matches!(failed, Error::ExternalOperationFailed { .. }));
    }

    /// Story: validation requires a spec change, internal errors retry
    #[test]
    fn story_validation_vs_internal() {
        assert!(!Error::validation("bad app name").is_retryable());
        assert!(Error::internal("watch stream hiccup").is_retryable());

        let err = Error::internal_with_context("client-factory", "tls handshake");
        assert!(err.to_string().contains("[client-factory]"));
    }
}
