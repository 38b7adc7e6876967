//! Filing Coordinator - Rust Implementation
//!
//! Coordinates rule-driven processing of regulatory filings across a fleet of
//! processor workers.
//!
//! # Overview
//!
//! This crate provides:
//! - A dispatcher that tracks which processor owns which market and routes
//!   administrative and export requests to the owner
//! - Processor workers that stage new filings, run them through a named rule
//!   set on a bounded pool, and export report artifacts
//! - A file-backed rules repository with a declarative rule engine
//! - A completion coordinator for parallel units of work
//!
//! # Quick Start
//!
//! ```rust
//! use filing_coordinator::dispatcher::ProcessorRegistry;
//!
//! let registry = ProcessorRegistry::new();
//! registry.register("proc-1", "http://proc-1:9100");
//! registry.assign("proc-1", 7).unwrap();
//!
//! assert_eq!(registry.owner_of(7).unwrap().server_key, "proc-1");
//! assert!(registry.unassigned_processors().is_empty());
//! ```

pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod observability;
pub mod processor;
pub mod protocol;
pub mod rules;
pub mod testing;

pub use completion::{CompletionState, CompletionStatus};
pub use config::*;
pub use dispatcher::{Dispatcher, DispatcherClient};
pub use error::{CoordinatorError, CoordinatorResult};
pub use processor::{FilingInfo, FilingStatus, ProcessorWorker};
pub use protocol::*;
pub use rules::{RuleError, RulesRepository};
