//! Seam to the rule-evaluation engine
//!
//! The repository never reuses a session: every rule execution opens a fresh
//! [`RuleSession`], binds the caller's context into it, runs one definition
//! file and receives its evaluation through a callback.

use super::context::ContextValue;
use super::RuleError;
use serde::Serialize;
use std::path::Path;

/// Engine able to open isolated evaluation sessions
pub trait RuleEngine: Send + Sync {
    fn open_session(&self) -> Box<dyn RuleSession>;
}

/// One isolated evaluation session
pub trait RuleSession: Send {
    /// Bind a context object under a name visible to the rule
    fn bind(&mut self, name: &str, value: ContextValue);

    /// Evaluate a rule-definition file, reporting its evaluation through
    /// `on_result`
    fn run(
        &mut self,
        rule_file: &Path,
        on_result: &mut dyn FnMut(RuleEvaluation),
    ) -> Result<(), RuleError>;
}

/// Pass/fail outcome of a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleOutcome {
    Passed,
    Failed { reason: String },
}

/// What a session reports for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleEvaluation {
    pub outcome: RuleOutcome,
    pub messages: Vec<String>,
}

impl RuleEvaluation {
    pub fn passed(messages: Vec<String>) -> Self {
        Self {
            outcome: RuleOutcome::Passed,
            messages,
        }
    }

    pub fn failed(reason: impl Into<String>, messages: Vec<String>) -> Self {
        Self {
            outcome: RuleOutcome::Failed {
                reason: reason.into(),
            },
            messages,
        }
    }
}

/// Result of one `process_rule` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleExecutionResult {
    pub rule_name: String,
    pub outcome: RuleOutcome,
    pub messages: Vec<String>,
    pub duration_ms: u64,
}

impl RuleExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RuleOutcome::Passed)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            RuleOutcome::Passed => None,
            RuleOutcome::Failed { reason } => Some(reason),
        }
    }
}
