//! Processor worker
//!
//! A processor owns a set of markets assigned by the dispatcher. For each
//! owned market it watches the intake folder, stages new filings into the
//! processing folder, runs every filing through the configured rule set on a
//! bounded pool, and exports report artifacts for filings that pass.

pub mod collaborators;
pub mod filing;
pub mod folders;
pub mod pipeline;
pub mod server;
pub mod staging;
pub mod worker;

pub use collaborators::{
    BatchDetail, FilingDatabase, MarketCatalog, MarketInfo, ReportRequest, ReportWriter,
    SummaryReportWriter,
};
pub use filing::{is_accession_number, FilingDocuments, FilingInfo, FilingStatus};
pub use folders::DependentFolders;
pub use pipeline::FilingPipeline;
pub use staging::{StagingFailure, StagingReport};
pub use worker::{PollSummary, ProcessorWorker, WorkerStatus};

use crate::rules::{RuleError, RulesRepository};

/// Load a repository's rule set: the persisted manifest when one exists,
/// otherwise a fresh directory scan that is then saved as the manifest.
///
/// A manifest that exists but cannot be parsed is an error rather than a
/// reason to rescan, so a curated manifest is never silently replaced.
pub fn initialize_rule_set(repository: &mut RulesRepository) -> Result<usize, RuleError> {
    match repository.try_load_existing_rules_list() {
        Ok(count) => Ok(count),
        Err(RuleError::ManifestNotFound(_)) => {
            let count = repository.try_load_new_rules_list()?;
            repository.try_save_rules_list()?;
            Ok(count)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Logger;
    use crate::rules::DeclarativeRuleEngine;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn repository(dir: &std::path::Path) -> RulesRepository {
        RulesRepository::new(
            "default",
            dir,
            Arc::new(DeclarativeRuleEngine::new()),
            Logger::unfiltered("rules"),
        )
    }

    #[test]
    fn test_initialize_scans_and_saves_when_no_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("A.toml"), "").unwrap();

        let mut repo = repository(dir.path());
        assert_eq!(initialize_rule_set(&mut repo).unwrap(), 1);
        assert!(dir.path().join("default.rul").is_file());
    }

    #[test]
    fn test_initialize_prefers_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("A.toml"), "").unwrap();
        fs::write(dir.path().join("B.toml"), "").unwrap();
        fs::write(
            dir.path().join("default.rul"),
            r#"[{"friendlyName":"A","ruleFile":"A.toml","isRequired":false,"enabled":true}]"#,
        )
        .unwrap();

        let mut repo = repository(dir.path());
        assert_eq!(initialize_rule_set(&mut repo).unwrap(), 1);
        assert!(!repo.rules()[0].is_required);
    }

    #[test]
    fn test_initialize_rejects_corrupt_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.rul"), "{not json").unwrap();

        let mut repo = repository(dir.path());
        assert!(matches!(
            initialize_rule_set(&mut repo),
            Err(RuleError::ManifestParse { .. })
        ));
    }
}
