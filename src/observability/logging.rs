//! Structured logging system using tracing crate
//!
//! The subscriber is installed once at process start; components never reach
//! for a global logger. Each component receives a [`Logger`] built from the
//! configuration, which tags events with the component name and a
//! [`LogCategory`] and drops events in excluded categories.
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG filing-coordinator -c processor.toml processor
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Named categories that can be excluded from the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Lifecycle,
    Registration,
    Assignment,
    Routing,
    FileMovement,
    RuleExecution,
    Export,
    Taxonomy,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Lifecycle => "lifecycle",
            LogCategory::Registration => "registration",
            LogCategory::Assignment => "assignment",
            LogCategory::Routing => "routing",
            LogCategory::FileMovement => "file_movement",
            LogCategory::RuleExecution => "rule_execution",
            LogCategory::Export => "export",
            LogCategory::Taxonomy => "taxonomy",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging handle passed to every component that emits events
#[derive(Debug, Clone)]
pub struct Logger {
    component: Arc<str>,
    excluded: Arc<BTreeSet<LogCategory>>,
}

impl Logger {
    pub fn new(component: &str, excluded: BTreeSet<LogCategory>) -> Self {
        Self {
            component: Arc::from(component),
            excluded: Arc::new(excluded),
        }
    }

    /// Logger with no excluded categories
    pub fn unfiltered(component: &str) -> Self {
        Self::new(component, BTreeSet::new())
    }

    /// Derive a logger for a sub-component sharing the same exclusions
    pub fn for_component(&self, component: &str) -> Self {
        Self {
            component: Arc::from(component),
            excluded: Arc::clone(&self.excluded),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn is_enabled(&self, category: LogCategory) -> bool {
        !self.excluded.contains(&category)
    }

    pub fn debug(&self, category: LogCategory, message: impl fmt::Display) {
        self.emit(Level::DEBUG, category, message);
    }

    pub fn info(&self, category: LogCategory, message: impl fmt::Display) {
        self.emit(Level::INFO, category, message);
    }

    pub fn warn(&self, category: LogCategory, message: impl fmt::Display) {
        self.emit(Level::WARN, category, message);
    }

    pub fn error(&self, category: LogCategory, message: impl fmt::Display) {
        self.emit(Level::ERROR, category, message);
    }

    fn emit(&self, level: Level, category: LogCategory, message: impl fmt::Display) {
        if !self.is_enabled(category) {
            return;
        }
        let component = &*self.component;
        let category = category.as_str();
        match level {
            Level::ERROR => tracing::error!(component, category, "{}", message),
            Level::WARN => tracing::warn!(component, category, "{}", message),
            Level::INFO => tracing::info!(component, category, "{}", message),
            Level::DEBUG => tracing::debug!(component, category, "{}", message),
            _ => tracing::trace!(component, category, "{}", message),
        }
    }
}

const QUIET_DEPENDENCIES: [&str; 4] = ["hyper=warn", "warp=warn", "reqwest=warn", "tokio=warn"];

/// Initialize logging with manual configuration
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let mut filter = EnvFilter::new(level.to_string());
    for directive in QUIET_DEPENDENCIES {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Allow RUST_LOG to override
    if let Ok(rust_log) = env::var("RUST_LOG") {
        filter = EnvFilter::new(rust_log);
    }

    let span_events = if include_spans {
        tracing_fmt::format::FmtSpan::NEW | tracing_fmt::format::FmtSpan::CLOSE
    } else {
        tracing_fmt::format::FmtSpan::NONE
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            let fmt_layer = tracing_fmt::layer().json().with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Compact => {
            let fmt_layer = tracing_fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
    }
}

fn parse_level(value: &str) -> Level {
    match value.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let include_spans = env::var("LOG_SPANS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    init_logging(parse_level(&log_level), LogFormat::parse(&format), include_spans);
}

/// Create a filing processing span
#[macro_export]
macro_rules! filing_span {
    ($($field:tt)*) => {
        tracing::info_span!("filing_processing", $($field)*)
    };
}

/// Create a dispatcher routing span
#[macro_export]
macro_rules! routing_span {
    ($($field:tt)*) => {
        tracing::info_span!("routing", $($field)*)
    };
}

pub use {filing_span, routing_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert!(matches!(LogFormat::parse("json"), LogFormat::Json));
        assert!(matches!(LogFormat::parse("PRETTY"), LogFormat::Pretty));
        assert!(matches!(LogFormat::parse("Compact"), LogFormat::Compact));
        assert!(matches!(LogFormat::parse("xml"), LogFormat::Json));
        assert!(matches!(LogFormat::parse(""), LogFormat::Json));
    }

    #[test]
    fn test_parse_level_defaults_to_info() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_logger_excludes_categories() {
        let excluded = BTreeSet::from([LogCategory::FileMovement, LogCategory::Export]);
        let logger = Logger::new("processor", excluded);

        assert!(!logger.is_enabled(LogCategory::FileMovement));
        assert!(!logger.is_enabled(LogCategory::Export));
        assert!(logger.is_enabled(LogCategory::RuleExecution));
    }

    #[test]
    fn test_child_logger_shares_exclusions() {
        let logger = Logger::new("processor", BTreeSet::from([LogCategory::Routing]));
        let child = logger.for_component("staging");

        assert_eq!(child.component(), "staging");
        assert!(!child.is_enabled(LogCategory::Routing));
        assert!(child.is_enabled(LogCategory::Lifecycle));
    }

    #[test]
    fn test_category_serde_names_match_display() {
        for category in [
            LogCategory::Lifecycle,
            LogCategory::FileMovement,
            LogCategory::RuleExecution,
        ] {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{category}\""));
        }
    }
}
