//! Processor worker behavior: staging, the bounded filing pool and exports
//!
//! Filings are laid out on disk the way the intake share delivers them and
//! run through the real worker, rule engine and summary report writer.


use filing_coordinator::processor::{
    FilingDatabase, FilingInfo, FilingStatus, MarketCatalog, PollSummary,
};
use filing_coordinator::protocol::messages::{BatchDetailExportRequest, BatchExportRequest, ReportFormat};
use filing_coordinator::testing::{write_filing, SAMPLE_ACCESSION, SAMPLE_INSTANCE};
use filing_coordinator::CoordinatorError;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use test_helpers::*;

fn accession(n: usize) -> String {
    format!("0000008670-08-{n:06}")
}

#[tokio::test]
async fn test_poll_stages_processes_and_exports_new_filings() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1]);
    let rules = rules_for(&section, &[("CheckTicker", TICKER_IS_ADP)]);
    let (worker, catalog) = test_worker(&section, rules);
    worker.assign_market_to_processor(1).await.unwrap();

    write_filing(&section.folders.intake, 1, SAMPLE_ACCESSION, SAMPLE_INSTANCE).unwrap();
    assert!(worker.has_new_filings().await);

    let summary = worker.poll_once().await.unwrap();

    assert_eq!(summary.staged, 1);
    assert_eq!(summary.exported, 1);
    assert_eq!(summary.failed, 0);
    assert!(!worker.has_new_filings().await);
    assert!(section
        .folders
        .processing
        .join("1")
        .join(SAMPLE_ACCESSION)
        .is_dir());

    let report = section
        .folders
        .reports
        .join("1")
        .join(format!("{SAMPLE_ACCESSION}_0_en.htm"));
    assert!(report.is_file());

    let details = catalog.batch_details(1).unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(catalog.export_files(details[0].batch_detail_id), vec![report]);
    assert_eq!(catalog.rule_results(details[0].batch_detail_id).len(), 1);
}

#[tokio::test]
async fn test_required_rule_failure_fails_only_that_filing() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1]);
    let rules = rules_for(&section, &[("CheckTicker", TICKER_IS_ADP)]);
    let (worker, _) = test_worker(&section, rules);
    worker.assign_market_to_processor(1).await.unwrap();

    write_filing(&section.folders.intake, 1, &accession(1), "adp-20080331.xml").unwrap();
    write_filing(&section.folders.intake, 1, &accession(2), "ibm-20080331.xml").unwrap();

    let summary = worker.poll_once().await.unwrap();

    assert_eq!(summary.staged, 2);
    assert_eq!(summary.exported, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(worker.metrics().snapshot().filings_failed, 1);
}

#[tokio::test]
async fn test_unowned_markets_are_not_polled() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1, 2]);
    let rules = rules_for(&section, &[]);
    let (worker, _) = test_worker(&section, rules);
    worker.assign_market_to_processor(1).await.unwrap();

    write_filing(&section.folders.intake, 2, SAMPLE_ACCESSION, SAMPLE_INSTANCE).unwrap();

    assert!(!worker.has_new_filings().await);
    assert_eq!(worker.poll_once().await.unwrap().staged, 0);
}

#[tokio::test]
async fn test_distinct_filings_run_concurrently() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1]);
    let rules = rules_for(&section, &[("CheckTicker", TICKER_IS_ADP)]);
    let reports = Arc::new(SlowReportWriter::new(Duration::from_millis(150)));
    let (worker, catalog) = test_worker_with_reports(&section, rules, reports.clone());
    worker.assign_market_to_processor(1).await.unwrap();

    let batch_id = catalog.open_batch(1).unwrap();
    let parent = section.folders.processing.join("1");
    let mut handles = Vec::new();
    for n in 1..=4 {
        write_filing(&section.folders.processing, 1, &accession(n), SAMPLE_INSTANCE).unwrap();
        let mut filing = FilingInfo::new(1, &parent, &accession(n)).unwrap();
        filing.transition(FilingStatus::Staged).unwrap();
        handles.push(worker.submit_filing(filing, batch_id).unwrap());
    }

    let filings = futures::future::join_all(handles).await;

    for filing in filings {
        assert_eq!(filing.unwrap().status, FilingStatus::Exported);
    }
    assert!(reports.peak_concurrency() >= 2);
    assert!(reports.peak_concurrency() <= section.pool_size);
    assert_eq!(worker.filings_in_flight(), 0);
}

#[tokio::test]
async fn test_same_accession_is_never_in_flight_twice() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1]);
    let rules = rules_for(&section, &[]);
    let reports = Arc::new(SlowReportWriter::new(Duration::from_millis(100)));
    let (worker, catalog) = test_worker_with_reports(&section, rules, reports);

    let batch_id = catalog.open_batch(1).unwrap();
    let parent = write_filing(&section.folders.processing, 1, SAMPLE_ACCESSION, SAMPLE_INSTANCE)
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf();
    let staged = || {
        let mut filing = FilingInfo::new(1, &parent, SAMPLE_ACCESSION).unwrap();
        filing.transition(FilingStatus::Staged).unwrap();
        filing
    };

    let first = worker.submit_filing(staged(), batch_id).unwrap();
    let second = worker.submit_filing(staged(), batch_id);
    assert!(matches!(second, Err(CoordinatorError::DuplicateFiling { .. })));
    assert_eq!(worker.filings_in_flight(), 1);

    assert_eq!(first.await.unwrap().status, FilingStatus::Exported);
    assert_eq!(worker.filings_in_flight(), 0);

    // Once the first run finished the accession may be submitted again.
    let again = worker.submit_filing(staged(), batch_id).unwrap();
    again.await.unwrap();
    assert_eq!(worker.metrics().snapshot().duplicate_submissions, 1);
}

#[tokio::test]
async fn test_batch_export_for_every_detail() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1]);
    let rules = rules_for(&section, &[]);
    let (worker, _) = test_worker(&section, rules);
    worker.assign_market_to_processor(1).await.unwrap();

    for n in 1..=3 {
        write_filing(&section.folders.intake, 1, &accession(n), SAMPLE_INSTANCE).unwrap();
    }
    worker.poll_once().await.unwrap();

    let request = BatchExportRequest {
        market_id: 1,
        batch_id: 1,
        lang: "fr".to_string(),
        format: ReportFormat::Xml,
        replace: false,
    };
    let paths = worker.create_batch_export_files(&request).await.unwrap();

    assert_eq!(paths.len(), 3);
    assert!(paths.iter().all(|path| path.is_file()));
    assert!(paths
        .iter()
        .all(|path| path.to_string_lossy().ends_with("_0_fr.xml")));
}

#[tokio::test]
async fn test_batch_export_aggregates_failures() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1]);
    let rules = rules_for(&section, &[]);
    let (worker, catalog) = test_worker(&section, rules);
    worker.assign_market_to_processor(1).await.unwrap();

    for n in 1..=3 {
        write_filing(&section.folders.intake, 1, &accession(n), SAMPLE_INSTANCE).unwrap();
    }
    worker.poll_once().await.unwrap();

    // The summary writer needs the filing folder; remove one of them.
    let details = catalog.batch_details(1).unwrap();
    std::fs::remove_dir_all(&details[1].filing_folder).unwrap();

    let request = BatchExportRequest {
        market_id: 1,
        batch_id: 1,
        lang: "de".to_string(),
        format: ReportFormat::Html,
        replace: true,
    };
    let err = worker.create_batch_export_files(&request).await.unwrap_err();

    match err {
        CoordinatorError::ExportAggregate { total, failures } => {
            assert_eq!(total, 3);
            assert_eq!(failures.len(), 1);
        }
        other => panic!("expected aggregated export error, got {other}"),
    }
    let written = std::fs::read_dir(section.folders.reports.join("1"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with("_de.htm"))
        .count();
    assert_eq!(written, 2);
}

#[tokio::test]
async fn test_exports_are_refused_for_unowned_markets() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1]);
    let rules = rules_for(&section, &[]);
    let (worker, _) = test_worker(&section, rules);

    let request = BatchDetailExportRequest {
        market_id: 1,
        batch_detail_id: 1,
        doc_id: 0,
        lang: "en".to_string(),
        format: ReportFormat::Html,
        replace: true,
    };
    let err = worker
        .create_batch_detail_export_file(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Routing { .. }));
}

#[tokio::test]
async fn test_release_stops_polling_a_market() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1]);
    let rules = rules_for(&section, &[]);
    let (worker, _) = test_worker(&section, rules);
    worker.assign_market_to_processor(1).await.unwrap();

    assert!(worker.release_market(1).await);
    assert!(!worker.release_market(1).await);

    write_filing(&section.folders.intake, 1, SAMPLE_ACCESSION, SAMPLE_INSTANCE).unwrap();
    assert!(!worker.has_new_filings().await);
}

#[tokio::test]
async fn test_batch_failure_defers_one_market_and_the_next_poll_resumes_it() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1, 2]);
    let rules = rules_for(&section, &[("CheckTicker", TICKER_IS_ADP)]);
    let catalog = Arc::new(MarketCatalog::from_config(&section.markets));
    let database = Arc::new(FlakyBatchDatabase::new(catalog.clone(), 1));
    let worker = test_worker_with_database(&section, rules, database);
    worker.assign_market_to_processor(1).await.unwrap();
    worker.assign_market_to_processor(2).await.unwrap();

    write_filing(&section.folders.intake, 1, &accession(1), SAMPLE_INSTANCE).unwrap();
    write_filing(&section.folders.intake, 2, &accession(2), SAMPLE_INSTANCE).unwrap();

    // Market 1 opens its batch first and hits the failure; market 2 still runs.
    let first = worker.poll_once().await.unwrap();
    assert_eq!(first.staged, 2);
    assert_eq!(first.deferred, 1);
    assert_eq!(first.exported, 1);
    assert!(!worker.has_new_filings().await);

    let second = worker.poll_once().await.unwrap();
    assert_eq!(second.resumed, 1);
    assert_eq!(second.staged, 0);
    assert_eq!(second.exported, 1);
    assert_eq!(second.deferred, 0);

    let third = worker.poll_once().await.unwrap();
    assert_eq!(third, PollSummary::default());
}

#[tokio::test]
async fn test_filings_left_staged_by_a_crash_are_resumed() {
    let root = TempDir::new().unwrap();
    let section = test_section(root.path(), "proc-1", &[1]);
    let rules = rules_for(&section, &[("CheckTicker", TICKER_IS_ADP)]);
    let (worker, catalog) = test_worker(&section, rules);
    worker.assign_market_to_processor(1).await.unwrap();

    // Staged before the restart but never processed
    write_filing(&section.folders.processing, 1, &accession(1), SAMPLE_INSTANCE).unwrap();
    // Fails its required rule in this cycle and is never picked up again
    write_filing(&section.folders.intake, 1, &accession(2), "ibm-20080331.xml").unwrap();
    let first = worker.poll_once().await.unwrap();
    assert_eq!(first.resumed, 1);
    assert_eq!(first.staged, 1);
    assert_eq!(first.exported, 1);
    assert_eq!(first.failed, 1);

    let second = worker.poll_once().await.unwrap();
    assert_eq!(second.resumed, 0);
    assert_eq!(catalog.batch_details(1).unwrap().len(), 2);
}
