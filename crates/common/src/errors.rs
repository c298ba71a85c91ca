use remedy_core::DomainError;
use thiserror::Error;

/// Error hierarchy for the remediation pipeline.
///
/// The taxonomy drives recovery behavior: transient failures retry with
/// backoff, validation failures roll back, safety violations hard-reject,
/// concurrency conflicts queue, and unrecoverable failures quarantine the
/// file and escalate.
#[derive(Error, Debug)]
pub enum RemedyError {
    // === Pipeline taxonomy ===
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("verification failed at stage '{stage}': {detail}")]
    Validation { stage: String, detail: String },

    #[error("safety violation: refusing to apply risky fix {fix_id}")]
    SafetyViolation { fix_id: uuid::Uuid },

    #[error("concurrent application in flight for {file}")]
    ConcurrencyConflict { file: String },

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    // === Infrastructure ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // === Domain & general ===
    #[error("domain invariant violated: {0}")]
    Domain(#[from] DomainError),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("operation timeout: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Error severity for alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RemedyError {
    /// Whether the pipeline may retry the failed operation with backoff.
    pub fn is_retriable(&self) -> bool {
        match self {
            RemedyError::TransientIo(_) => true,
            RemedyError::Timeout(_) => true,
            RemedyError::Provider(_) => true,
            RemedyError::Queue(_) => true,
            // Validation failures roll back instead of retrying blindly
            RemedyError::Validation { .. } => false,
            // Never retried, never downgraded
            RemedyError::SafetyViolation { .. } => false,
            RemedyError::Unrecoverable(_) => false,
            _ => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RemedyError::Unrecoverable(_) => ErrorSeverity::Critical,
            RemedyError::Internal(_) => ErrorSeverity::Critical,
            RemedyError::SafetyViolation { .. } => ErrorSeverity::High,
            RemedyError::Storage(_) => ErrorSeverity::High,
            RemedyError::Configuration(_) => ErrorSeverity::High,
            RemedyError::Validation { .. } => ErrorSeverity::Medium,
            RemedyError::Timeout(_) => ErrorSeverity::Medium,
            RemedyError::Queue(_) => ErrorSeverity::Medium,
            RemedyError::ConcurrencyConflict { .. } => ErrorSeverity::Low,
            RemedyError::Cache(_) => ErrorSeverity::Low,
            RemedyError::NotFound(_) => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RemedyError::TransientIo(_) => "TRANSIENT_IO",
            RemedyError::Validation { .. } => "VALIDATION_FAILURE",
            RemedyError::SafetyViolation { .. } => "SAFETY_VIOLATION",
            RemedyError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            RemedyError::Unrecoverable(_) => "UNRECOVERABLE",
            RemedyError::Io(_) => "IO_ERROR",
            RemedyError::Storage(_) => "STORAGE_ERROR",
            RemedyError::Cache(_) => "CACHE_ERROR",
            RemedyError::Queue(_) => "QUEUE_ERROR",
            RemedyError::Provider(_) => "PROVIDER_ERROR",
            RemedyError::Serialization(_) => "SERIALIZATION_ERROR",
            RemedyError::Domain(_) => "DOMAIN_ERROR",
            RemedyError::NotFound(_) => "NOT_FOUND",
            RemedyError::Timeout(_) => "TIMEOUT",
            RemedyError::Configuration(_) => "CONFIG_ERROR",
            RemedyError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result alias used across crate APIs
pub type RemedyResult<T> = Result<T, RemedyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(RemedyError::TransientIo("socket reset".into()).is_retriable());
        assert!(RemedyError::Timeout("verify".into()).is_retriable());
        assert!(!RemedyError::SafetyViolation {
            fix_id: uuid::Uuid::new_v4()
        }
        .is_retriable());
        assert!(!RemedyError::Validation {
            stage: "tests".into(),
            detail: "1 failed".into()
        }
        .is_retriable());
    }

    #[test]
    fn severity_ordering() {
        let unrecoverable = RemedyError::Unrecoverable("restore failed".into());
        let conflict = RemedyError::ConcurrencyConflict {
            file: "a.rs".into(),
        };
        assert_eq!(unrecoverable.severity(), ErrorSeverity::Critical);
        assert!(unrecoverable.severity() > conflict.severity());
    }

    #[test]
    fn domain_errors_convert() {
        let err: RemedyError = DomainError::OutcomeAlreadyRecorded(uuid::Uuid::new_v4()).into();
        assert_eq!(err.error_code(), "DOMAIN_ERROR");
    }
}
