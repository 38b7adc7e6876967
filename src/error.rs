//! Error types for dispatcher, processor and rule operations
//!
//! Errors that cross a process boundary are folded into the
//! success-flag-plus-message convention by [`CoordinatorError::to_reply_message`]
//! instead of being marshalled as structured errors.

use crate::protocol::messages::MarketId;
use crate::rules::RuleError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for coordination operations
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Missing required {role} folder: {}", path.display())]
    MissingFolder { role: String, path: PathBuf },

    #[error("Registration error: {message}")]
    Registration { message: String },

    #[error("Cannot assign market {market_id}: processor '{server_key}' is not registered")]
    AssignmentConflict {
        server_key: String,
        market_id: MarketId,
    },

    #[error("Routing error: {message}")]
    Routing { message: String },

    #[error("Market {market_id} moved from '{expected}' to {} while the request was in flight", actual.as_deref().unwrap_or("no processor"))]
    OwnershipChanged {
        market_id: MarketId,
        expected: String,
        actual: Option<String>,
    },

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Required rule '{rule}' failed: {reason}")]
    RequiredRuleFailed { rule: String, reason: String },

    #[error("Filing {accession} cannot move from {from} to {to}")]
    InvalidTransition {
        accession: String,
        from: String,
        to: String,
    },

    #[error("Filing {accession} is already being processed")]
    DuplicateFiling { accession: String },

    #[error("Export failed: {message}")]
    Export { message: String },

    #[error("{} of {total} exports failed: {}", failures.len(), failures.join("; "))]
    ExportAggregate { total: usize, failures: Vec<String> },

    #[error("Folder access error for {}: {message}", path.display())]
    FolderAccess { path: PathBuf, message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Staging error: {message}")]
    Staging { message: String },

    /// The remote service could not be reached
    #[error("Remote call failed: {message}")]
    Remote { message: String },

    /// The remote service handled the request and reported a definite failure
    #[error("{message}")]
    RemoteFailed { message: String },

    #[error("Retryable failure: {message}")]
    Retryable { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl CoordinatorError {
    pub fn registration<S: Into<String>>(message: S) -> Self {
        Self::Registration {
            message: message.into(),
        }
    }

    pub fn assignment_conflict<S: Into<String>>(server_key: S, market_id: MarketId) -> Self {
        Self::AssignmentConflict {
            server_key: server_key.into(),
            market_id,
        }
    }

    pub fn routing<S: Into<String>>(message: S) -> Self {
        Self::Routing {
            message: message.into(),
        }
    }

    pub fn ownership_changed<S: Into<String>>(
        market_id: MarketId,
        expected: S,
        actual: Option<String>,
    ) -> Self {
        Self::OwnershipChanged {
            market_id,
            expected: expected.into(),
            actual,
        }
    }

    pub fn export<S: Into<String>>(message: S) -> Self {
        Self::Export {
            message: message.into(),
        }
    }

    pub fn folder_access<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::FolderAccess {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn database<S: Into<String>>(message: S) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn staging<S: Into<String>>(message: S) -> Self {
        Self::Staging {
            message: message.into(),
        }
    }

    pub fn remote<S: Into<String>>(message: S) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub fn remote_failed<S: Into<String>>(message: S) -> Self {
        Self::RemoteFailed {
            message: message.into(),
        }
    }

    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same request unchanged
    ///
    /// Ownership races and transport failures are retryable; everything else
    /// reports a definite outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::OwnershipChanged { .. }
                | CoordinatorError::Retryable { .. }
                | CoordinatorError::Remote { .. }
        )
    }

    /// Message placed in a remote reply
    ///
    /// Aggregated export failures are never truncated so every failed file
    /// reaches the caller. A relayed remote failure was already bounded by the
    /// service that produced it.
    pub fn to_reply_message(&self) -> String {
        let redacted = redact_error_message(&self.to_string());
        match self {
            CoordinatorError::ExportAggregate { .. } | CoordinatorError::RemoteFailed { .. } => {
                redacted
            }
            _ => truncate_error_message(redacted),
        }
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("sensitive path pattern is valid")
});

const MAX_REPLY_MESSAGE_LEN: usize = 500;

/// Strip credentials and sensitive paths from messages sent to remote callers
fn redact_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string()
}

fn truncate_error_message(mut sanitized: String) -> String {
    if sanitized.len() > MAX_REPLY_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_REPLY_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for coordination operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_conflict_message() {
        let error = CoordinatorError::assignment_conflict("proc-9", 12);
        assert_eq!(
            error.to_string(),
            "Cannot assign market 12: processor 'proc-9' is not registered"
        );
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_ownership_changed_is_retryable() {
        let error = CoordinatorError::ownership_changed(4, "proc-a", None);
        assert!(error.is_retryable());
        assert!(error.to_string().contains("no processor"));

        let error = CoordinatorError::ownership_changed(4, "proc-a", Some("proc-b".to_string()));
        assert!(error.to_string().contains("proc-b"));
    }

    #[test]
    fn test_missing_folder_names_role_and_path() {
        let error = CoordinatorError::MissingFolder {
            role: "intake".to_string(),
            path: PathBuf::from("/data/intake"),
        };
        assert_eq!(
            error.to_string(),
            "Missing required intake folder: /data/intake"
        );
    }

    #[test]
    fn test_export_aggregate_lists_failures() {
        let error = CoordinatorError::ExportAggregate {
            total: 3,
            failures: vec!["detail 1: locked".to_string(), "detail 3: gone".to_string()],
        };
        let text = error.to_string();
        assert!(text.starts_with("2 of 3 exports failed"));
        assert!(text.contains("detail 1: locked"));
        assert!(text.contains("detail 3: gone"));
    }

    #[test]
    fn test_reply_message_redacts_secrets() {
        let error = CoordinatorError::database("login failed: password=hunter2 token=abc");
        let message = error.to_reply_message();
        assert!(!message.contains("hunter2"));
        assert!(!message.contains("abc"));
        assert!(message.contains("password=***"));
    }

    #[test]
    fn test_reply_message_redacts_sensitive_paths() {
        let message = redact_error_message("cannot read /home/svc/.ssh/id_rsa");
        assert!(message.contains("/***REDACTED***/"));
        assert!(!message.contains("id_rsa"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = CoordinatorError::database("x".repeat(600)).to_reply_message();
        assert!(sanitized.len() <= MAX_REPLY_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));

        let exact = truncate_error_message("y".repeat(MAX_REPLY_MESSAGE_LEN));
        assert_eq!(exact.len(), MAX_REPLY_MESSAGE_LEN);
    }

    #[test]
    fn test_export_aggregate_reply_keeps_every_failure() {
        let failures: Vec<String> = (1..=20)
            .map(|n| format!("batch detail {n}: report folder 0000008670-08-{n:06} is gone"))
            .collect();
        let error = CoordinatorError::ExportAggregate {
            total: 25,
            failures: failures.clone(),
        };

        let message = error.to_reply_message();

        assert!(message.len() > MAX_REPLY_MESSAGE_LEN);
        assert!(!message.ends_with("...[truncated]"));
        for failure in &failures {
            assert!(message.contains(failure.as_str()), "missing '{failure}'");
        }
    }

    #[test]
    fn test_definite_remote_failure_is_not_retryable() {
        let relayed = CoordinatorError::remote_failed("Export failed: batch detail 99 not found");
        assert!(!relayed.is_retryable());
        assert_eq!(
            relayed.to_reply_message(),
            "Export failed: batch detail 99 not found"
        );

        assert!(CoordinatorError::remote("http://proc-1:9100 unreachable").is_retryable());
    }

    #[test]
    fn test_rule_error_converts() {
        let error: CoordinatorError = RuleError::UnknownRule("Missing".to_string()).into();
        assert!(matches!(error, CoordinatorError::Rule(_)));
        assert!(error.to_string().contains("Missing"));
    }
}
