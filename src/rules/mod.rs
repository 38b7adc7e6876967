//! Rule repository and rule evaluation
//!
//! A [`RulesRepository`] manages a named, file-backed rule set: it loads the
//! persisted `<name>.rul` manifest (or synthesizes one from the rule
//! definitions in its directory), saves it back, and runs individual rules
//! against a per-call [`RuleContext`] through a fresh [`RuleSession`].

pub mod context;
pub mod declarative;
pub mod engine;
pub mod repository;
pub mod rule;

pub use context::{ContextValue, Record, RuleContext};
pub use declarative::DeclarativeRuleEngine;
pub use engine::{RuleEngine, RuleEvaluation, RuleExecutionResult, RuleOutcome, RuleSession};
pub use repository::RulesRepository;
pub use rule::{Rule, MANIFEST_EXTENSION, RULE_DEFINITION_EXTENSION};

use std::path::PathBuf;
use thiserror::Error;

/// Rule loading and execution errors
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule source directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("rule manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),
    #[error("failed to parse rule manifest {}: {message}", path.display())]
    ManifestParse { path: PathBuf, message: String },
    #[error("failed to write rule manifest {}: {message}", path.display())]
    ManifestWrite { path: PathBuf, message: String },
    #[error("duplicate rule name '{0}'")]
    DuplicateRule(String),
    #[error("unknown rule '{0}'")]
    UnknownRule(String),
    #[error("invalid rule definition {}: {message}", path.display())]
    Definition { path: PathBuf, message: String },
    #[error("rule '{0}' finished without producing a result")]
    NoResult(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
