//! Rule pipeline for one staged filing
//!
//! Rules run in manifest order against a fresh context built for the filing.
//! A failing required rule aborts the filing with the rule's result as the
//! failure reason; a failing optional rule is recorded and the pipeline moves
//! on. A filing that clears every required rule has its results recorded and
//! its report exported.

use super::collaborators::{BatchDetail, FilingDatabase, ReportRequest, ReportWriter};
use super::filing::{FilingInfo, FilingStatus};
use super::folders::DependentFolders;
use crate::config::ExportSection;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::observability::{LogCategory, Logger, ProcessorMetrics};
use crate::protocol::messages::{BatchId, ReportFormat};
use crate::rules::{ContextValue, RuleContext, RuleExecutionResult, RuleOutcome, RulesRepository};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Everything a filing needs on its way from staged to exported
pub struct FilingPipeline {
    rules: Arc<RulesRepository>,
    database: Arc<dyn FilingDatabase>,
    reports: Arc<dyn ReportWriter>,
    folders: DependentFolders,
    export_defaults: ExportSection,
    metrics: Arc<ProcessorMetrics>,
    log: Logger,
}

impl FilingPipeline {
    pub fn new(
        rules: Arc<RulesRepository>,
        database: Arc<dyn FilingDatabase>,
        reports: Arc<dyn ReportWriter>,
        folders: DependentFolders,
        export_defaults: ExportSection,
        metrics: Arc<ProcessorMetrics>,
        log: Logger,
    ) -> Self {
        Self {
            rules,
            database,
            reports,
            folders,
            export_defaults,
            metrics,
            log,
        }
    }

    pub fn rules(&self) -> &RulesRepository {
        &self.rules
    }

    pub fn database(&self) -> &Arc<dyn FilingDatabase> {
        &self.database
    }

    /// Run the rule set and export for one staged filing.
    ///
    /// Never returns an error: every failure is captured in the returned
    /// filing's [`FilingStatus::Failed`] reason so one filing cannot affect
    /// another.
    pub fn process_filing_callback(&self, mut filing: FilingInfo, batch_id: BatchId) -> FilingInfo {
        let span = crate::filing_span!(
            accession = %filing.accession_number,
            market_id = filing.market_id,
            batch_id
        );
        let _entered = span.enter();

        let started = Instant::now();
        self.metrics.filing_started();

        match self.run(&mut filing, batch_id) {
            Ok(()) => {
                self.metrics.filing_exported(started.elapsed());
                self.log.info(
                    LogCategory::Export,
                    format!("Filing {} exported", filing.accession_number),
                );
            }
            Err(e) => {
                filing.fail(e.to_string());
                self.metrics.filing_failed(started.elapsed());
                self.log.warn(
                    LogCategory::RuleExecution,
                    format!("Filing {} failed: {e}", filing.accession_number),
                );
            }
        }
        filing
    }

    fn run(&self, filing: &mut FilingInfo, batch_id: BatchId) -> CoordinatorResult<()> {
        let detail = self.database.create_batch_detail(batch_id, filing)?;
        let context = RuleContext::new()
            .with("Filing", filing.to_record())
            .with("MarketId", i64::from(filing.market_id))
            .with("BatchDetailId", ContextValue::Integer(detail.batch_detail_id));

        let results = self.run_rules(filing, &context)?;
        self.database
            .record_rule_results(detail.batch_detail_id, &results)?;
        filing.transition(FilingStatus::RuleProcessed)?;

        self.export(
            &detail,
            0,
            &self.export_defaults.lang,
            self.export_defaults.format,
            true,
        )?;
        filing.transition(FilingStatus::Exported)
    }

    fn run_rules(
        &self,
        filing: &FilingInfo,
        context: &RuleContext,
    ) -> CoordinatorResult<Vec<RuleExecutionResult>> {
        let mut results = Vec::with_capacity(self.rules.len());

        for rule in self.rules.rules() {
            if !self.rules.is_rule_enabled(&rule.friendly_name) {
                self.log.debug(
                    LogCategory::RuleExecution,
                    format!("Skipping disabled rule '{}'", rule.friendly_name),
                );
                continue;
            }

            let failure = match self.rules.process_rule(&rule.friendly_name, context) {
                Ok(result) => {
                    let failure = result.failure_reason().map(str::to_string);
                    results.push(result);
                    failure
                }
                Err(e) => {
                    let reason = e.to_string();
                    results.push(RuleExecutionResult {
                        rule_name: rule.friendly_name.clone(),
                        outcome: RuleOutcome::Failed {
                            reason: reason.clone(),
                        },
                        messages: Vec::new(),
                        duration_ms: 0,
                    });
                    Some(reason)
                }
            };

            let Some(reason) = failure else { continue };
            if rule.is_required {
                return Err(CoordinatorError::RequiredRuleFailed {
                    rule: rule.friendly_name.clone(),
                    reason,
                });
            }

            self.metrics.optional_rule_failed();
            self.log.warn(
                LogCategory::RuleExecution,
                format!(
                    "Optional rule '{}' failed for {}: {reason}",
                    rule.friendly_name, filing.accession_number
                ),
            );
        }

        Ok(results)
    }

    /// Report path for a batch detail:
    /// `<reports>/<market_id>/<accession>_<doc_id>_<lang>.<ext>`
    pub fn report_path(
        &self,
        detail: &BatchDetail,
        doc_id: i64,
        lang: &str,
        format: ReportFormat,
    ) -> PathBuf {
        self.folders.reports_for(detail.market_id).join(format!(
            "{}_{}_{}.{}",
            detail.accession_number,
            doc_id,
            lang,
            format.extension()
        ))
    }

    /// Write the report for one batch detail and record it.
    ///
    /// With `replace` false an existing report is kept and returned as is.
    pub fn export(
        &self,
        detail: &BatchDetail,
        doc_id: i64,
        lang: &str,
        format: ReportFormat,
        replace: bool,
    ) -> CoordinatorResult<PathBuf> {
        let destination = self.report_path(detail, doc_id, lang, format);
        if destination.exists() && !replace {
            self.log.debug(
                LogCategory::Export,
                format!("Keeping existing report {}", destination.display()),
            );
            return Ok(destination);
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let written = self.reports.write_report(&ReportRequest {
            detail,
            doc_id,
            lang,
            format,
            destination: &destination,
        });
        if let Err(e) = written {
            self.metrics.export_failed();
            return Err(e);
        }

        self.database
            .record_export_file(detail.batch_detail_id, &destination)?;
        self.metrics.export_written();
        self.log.debug(
            LogCategory::Export,
            format!("Wrote report {}", destination.display()),
        );
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FolderSection;
    use crate::processor::collaborators::{MarketCatalog, MarketInfo, SummaryReportWriter};
    use crate::rules::DeclarativeRuleEngine;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        pipeline: FilingPipeline,
        catalog: Arc<MarketCatalog>,
        metrics: Arc<ProcessorMetrics>,
        folders: DependentFolders,
    }

    fn fixture(rules: &[(&str, &str, bool)]) -> Fixture {
        let root = TempDir::new().unwrap();
        let config = FolderSection {
            intake: root.path().join("intake"),
            processing: root.path().join("processing"),
            reports: root.path().join("reports"),
        };
        for dir in [&config.intake, &config.processing, &config.reports] {
            fs::create_dir_all(dir).unwrap();
        }
        let folders = DependentFolders::try_get_dependent_folder_configuration(&config).unwrap();

        let rule_dir = root.path().join("rules");
        fs::create_dir_all(&rule_dir).unwrap();
        for (name, body, _) in rules {
            fs::write(rule_dir.join(format!("{name}.toml")), body).unwrap();
        }
        let mut repository = RulesRepository::new(
            "default",
            &rule_dir,
            Arc::new(DeclarativeRuleEngine::new()),
            Logger::unfiltered("rules"),
        );
        repository.try_load_new_rules_list().unwrap();
        for (name, _, required) in rules {
            repository.set_required(name, *required);
        }

        let catalog = Arc::new(MarketCatalog::new([MarketInfo {
            market_id: 1,
            name: "NYSE".to_string(),
            taxonomy_path: None,
        }]));
        let metrics = Arc::new(ProcessorMetrics::new());
        let pipeline = FilingPipeline::new(
            Arc::new(repository),
            catalog.clone(),
            Arc::new(SummaryReportWriter),
            folders.clone(),
            ExportSection::default(),
            metrics.clone(),
            Logger::unfiltered("pipeline"),
        );
        Fixture {
            _root: root,
            pipeline,
            catalog,
            metrics,
            folders,
        }
    }

    fn staged_filing(folders: &DependentFolders, accession: &str) -> FilingInfo {
        let parent = folders.processing_for(1);
        let folder = parent.join(accession);
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("adp-20080331.xml"), "<xbrl/>").unwrap();
        let mut filing = FilingInfo::new(1, &parent, accession).unwrap();
        filing.transition(FilingStatus::Staged).unwrap();
        filing
    }

    const PASSES: &str = "[[actions]]\nrequire = \"Filing.Ticker\"\nequals = \"adp\"\n";
    const FAILS: &str = "[[actions]]\nrequire = \"Filing.Ticker\"\nequals = \"ibm\"\nmessage = \"wrong ticker\"\n";

    #[test]
    fn test_all_rules_pass_and_report_is_exported() {
        let fx = fixture(&[("CheckTicker", PASSES, true)]);
        let batch = fx.catalog.open_batch(1).unwrap();
        let filing = staged_filing(&fx.folders, "0000008670-08-000046");

        let filing = fx.pipeline.process_filing_callback(filing, batch);

        assert_eq!(filing.status, FilingStatus::Exported);
        let details = fx.catalog.batch_details(batch).unwrap();
        assert_eq!(details.len(), 1);
        let detail_id = details[0].batch_detail_id;
        assert_eq!(fx.catalog.rule_results(detail_id).len(), 1);
        let exported = fx.catalog.export_files(detail_id);
        assert_eq!(exported.len(), 1);
        assert!(exported[0].starts_with(fx.folders.reports_for(1)));
        assert!(Path::new(&exported[0]).is_file());
        assert_eq!(fx.metrics.snapshot().filings_exported, 1);
    }

    #[test]
    fn test_required_failure_aborts_filing() {
        let fx = fixture(&[("A_Required", FAILS, true), ("B_Next", PASSES, true)]);
        let batch = fx.catalog.open_batch(1).unwrap();
        let filing = staged_filing(&fx.folders, "0000008670-08-000046");

        let filing = fx.pipeline.process_filing_callback(filing, batch);

        match &filing.status {
            FilingStatus::Failed { reason } => {
                assert!(reason.contains("A_Required"));
                assert!(reason.contains("wrong ticker"));
            }
            other => panic!("unexpected status {other}"),
        }
        let detail_id = fx.catalog.batch_details(batch).unwrap()[0].batch_detail_id;
        assert!(fx.catalog.export_files(detail_id).is_empty());
        assert_eq!(fx.metrics.snapshot().filings_failed, 1);
    }

    #[test]
    fn test_optional_failure_continues() {
        let fx = fixture(&[("A_Optional", FAILS, false), ("B_Required", PASSES, true)]);
        let batch = fx.catalog.open_batch(1).unwrap();
        let filing = staged_filing(&fx.folders, "0000008670-08-000046");

        let filing = fx.pipeline.process_filing_callback(filing, batch);

        assert_eq!(filing.status, FilingStatus::Exported);
        let detail_id = fx.catalog.batch_details(batch).unwrap()[0].batch_detail_id;
        let results = fx.catalog.rule_results(detail_id);
        assert_eq!(results.len(), 2);
        assert!(!results[0].is_success());
        assert!(results[1].is_success());
        assert_eq!(fx.metrics.snapshot().optional_rule_failures, 1);
    }

    #[test]
    fn test_export_keeps_existing_report_unless_replacing() {
        let fx = fixture(&[]);
        let batch = fx.catalog.open_batch(1).unwrap();
        let filing = staged_filing(&fx.folders, "0000008670-08-000046");
        let detail = fx.catalog.create_batch_detail(batch, &filing).unwrap();

        let path = fx
            .pipeline
            .export(&detail, 5, "fr", ReportFormat::Xml, false)
            .unwrap();
        assert!(path.ends_with("0000008670-08-000046_5_fr.xml"));

        fs::write(&path, "edited").unwrap();
        fx.pipeline
            .export(&detail, 5, "fr", ReportFormat::Xml, false)
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "edited");

        fx.pipeline
            .export(&detail, 5, "fr", ReportFormat::Xml, true)
            .unwrap();
        assert_ne!(fs::read_to_string(&path).unwrap(), "edited");
    }
}
