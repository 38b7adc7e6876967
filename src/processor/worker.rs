//! Processor worker: owned markets, intake polling and the filing pool
//!
//! Filings run on a bounded pool. A semaphore caps how many are in flight,
//! each filing's synchronous rule work runs on the blocking thread pool, and a
//! panic inside one filing is caught at its join handle and recorded as a
//! failure of that filing only.

use super::collaborators::{FilingDatabase, ReportWriter};
use super::filing::FilingInfo;
use super::folders::DependentFolders;
use super::pipeline::FilingPipeline;
use super::staging::{self, StagingReport};
use crate::completion::{CompletionState, CompletionStatus};
use crate::config::ProcessorSection;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::observability::{LogCategory, Logger, MetricsSnapshot, ProcessorMetrics};
use crate::protocol::messages::{
    BatchDetailExportRequest, BatchExportRequest, BatchId, MarketId,
};
use crate::rules::RulesRepository;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;

type InFlightSet = Arc<Mutex<HashSet<String>>>;

fn lock_set(set: &InFlightSet) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds an accession number in the in-flight set until dropped
struct InFlightGuard {
    set: InFlightSet,
    accession: String,
}

impl InFlightGuard {
    fn claim(set: &InFlightSet, accession: &str) -> Option<Self> {
        if !lock_set(set).insert(accession.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            accession: accession.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_set(&self.set).remove(&self.accession);
    }
}

/// Counts from one poll cycle
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Filings found staged but unfinished from an earlier cycle
    pub resumed: usize,
    pub staged: usize,
    pub staging_failures: usize,
    pub exported: usize,
    pub failed: usize,
    pub rejected: usize,
    /// Filings left staged because their batch could not be opened
    pub deferred: usize,
}

/// State reported by the processor health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub server_key: String,
    pub markets: Vec<MarketId>,
    pub filings_in_flight: usize,
    pub metrics: MetricsSnapshot,
}

/// One processor instance
pub struct ProcessorWorker {
    server_key: String,
    folders: DependentFolders,
    poll_interval: Duration,
    markets: RwLock<BTreeSet<MarketId>>,
    in_flight: InFlightSet,
    pool: Arc<Semaphore>,
    pipeline: Arc<FilingPipeline>,
    metrics: Arc<ProcessorMetrics>,
    log: Logger,
}

impl ProcessorWorker {
    /// Build a worker from its configuration section.
    ///
    /// Fails when a dependent folder is missing; the processor must not start
    /// in that case.
    pub fn new(
        config: &ProcessorSection,
        rules: RulesRepository,
        database: Arc<dyn FilingDatabase>,
        reports: Arc<dyn ReportWriter>,
        log: Logger,
    ) -> CoordinatorResult<Self> {
        let folders = DependentFolders::try_get_dependent_folder_configuration(&config.folders)?;
        let metrics = Arc::new(ProcessorMetrics::new());
        let pipeline = FilingPipeline::new(
            Arc::new(rules),
            database,
            reports,
            folders.clone(),
            config.export.clone(),
            metrics.clone(),
            log.for_component("pipeline"),
        );

        log.info(
            LogCategory::Lifecycle,
            format!(
                "Processor '{}' ready: pool_size={}, intake={}",
                config.server_key,
                config.pool_size,
                folders.intake.display()
            ),
        );

        Ok(Self {
            server_key: config.server_key.clone(),
            folders,
            poll_interval: config.poll_interval(),
            markets: RwLock::new(BTreeSet::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pool: Arc::new(Semaphore::new(config.pool_size)),
            pipeline: Arc::new(pipeline),
            metrics,
            log,
        })
    }

    pub fn server_key(&self) -> &str {
        &self.server_key
    }

    pub fn folders(&self) -> &DependentFolders {
        &self.folders
    }

    pub fn metrics(&self) -> &ProcessorMetrics {
        &self.metrics
    }

    pub async fn owned_markets(&self) -> Vec<MarketId> {
        self.markets.read().await.iter().copied().collect()
    }

    pub async fn owns_market(&self, market_id: MarketId) -> bool {
        self.markets.read().await.contains(&market_id)
    }

    pub fn filings_in_flight(&self) -> usize {
        lock_set(&self.in_flight).len()
    }

    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            server_key: self.server_key.clone(),
            markets: self.owned_markets().await,
            filings_in_flight: self.filings_in_flight(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Take ownership of a market: prepare its folders and load its base
    /// taxonomy when the market has one
    pub async fn assign_market_to_processor(&self, market_id: MarketId) -> CoordinatorResult<()> {
        let market = self
            .pipeline
            .database()
            .market(market_id)?
            .ok_or_else(|| CoordinatorError::routing(format!("unknown market {market_id}")))?;

        self.folders.prepare_market(market_id)?;

        if let Some(taxonomy) = &market.taxonomy_path {
            // A missing taxonomy can be loaded later; ownership still moves.
            if let Err(e) = self.load_market_base_taxonomy(taxonomy).await {
                self.log.warn(
                    LogCategory::Taxonomy,
                    format!("Market {market_id} assigned without its taxonomy: {e}"),
                );
            }
        }

        let newly_owned = self.markets.write().await.insert(market_id);
        self.log.info(
            LogCategory::Assignment,
            if newly_owned {
                format!("Market {market_id} ({}) assigned to '{}'", market.name, self.server_key)
            } else {
                format!("Market {market_id} already owned by '{}'", self.server_key)
            },
        );
        Ok(())
    }

    /// Stop polling a market. Filings already in flight finish normally.
    pub async fn release_market(&self, market_id: MarketId) -> bool {
        let released = self.markets.write().await.remove(&market_id);
        if released {
            self.log.info(
                LogCategory::Assignment,
                format!("Market {market_id} released by '{}'", self.server_key),
            );
        }
        released
    }

    pub async fn load_market_base_taxonomy(&self, taxonomy_path: &Path) -> CoordinatorResult<()> {
        let database = Arc::clone(self.pipeline.database());
        let path = taxonomy_path.to_path_buf();
        tokio::task::spawn_blocking(move || database.load_taxonomy(&path))
            .await
            .map_err(|e| CoordinatorError::internal_error(format!("taxonomy load task failed: {e}")))??;

        self.log.info(
            LogCategory::Taxonomy,
            format!("Loaded taxonomy {}", taxonomy_path.display()),
        );
        Ok(())
    }

    /// Check that a folder exists and can be listed and written to
    pub async fn can_access_folder(&self, folder_path: &Path) -> CoordinatorResult<()> {
        let path = folder_path.to_path_buf();
        tokio::task::spawn_blocking(move || check_folder_access(&path))
            .await
            .map_err(|e| CoordinatorError::internal_error(format!("folder access check failed: {e}")))?
    }

    pub async fn has_new_filings(&self) -> bool {
        let markets = self.owned_markets().await;
        staging::has_new_filings(&self.folders, &markets)
    }

    pub async fn try_move_filings_to_processing_folder(&self) -> CoordinatorResult<StagingReport> {
        let markets = self.owned_markets().await;
        let folders = self.folders.clone();
        let log = self.log.for_component("staging");
        let report = tokio::task::spawn_blocking(move || {
            staging::try_move_filings_to_processing_folder(&folders, &markets, &log)
        })
        .await
        .map_err(|e| CoordinatorError::staging(format!("staging task failed: {e}")))?;

        self.metrics.filings_staged(report.staged.len());
        self.metrics.staging_failed(report.failures.len());
        Ok(report)
    }

    /// Queue one staged filing on the pool.
    ///
    /// Rejected while another submission of the same accession number is in
    /// flight.
    pub fn submit_filing(
        &self,
        filing: FilingInfo,
        batch_id: BatchId,
    ) -> CoordinatorResult<JoinHandle<FilingInfo>> {
        let guard = match InFlightGuard::claim(&self.in_flight, &filing.accession_number) {
            Some(guard) => guard,
            None => {
                self.metrics.duplicate_submission();
                return Err(CoordinatorError::DuplicateFiling {
                    accession: filing.accession_number,
                });
            }
        };

        let pool = Arc::clone(&self.pool);
        let pipeline = Arc::clone(&self.pipeline);
        let metrics = Arc::clone(&self.metrics);
        let log = self.log.clone();

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let mut fallback = filing.clone();

            let permit = match pool.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    fallback.fail("worker pool is closed");
                    return fallback;
                }
            };

            let outcome = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                pipeline.process_filing_callback(filing, batch_id)
            })
            .await;

            let filing = match outcome {
                Ok(filing) => filing,
                Err(e) => {
                    metrics.filing_failed(Duration::ZERO);
                    log.error(
                        LogCategory::RuleExecution,
                        format!("Filing {} aborted: {e}", fallback.accession_number),
                    );
                    fallback.fail(format!("processing aborted: {e}"));
                    fallback
                }
            };

            if let Err(e) = staging::record_outcome(&filing).await {
                log.warn(
                    LogCategory::FileMovement,
                    format!(
                        "Cannot record outcome of {}: {e}",
                        filing.accession_number
                    ),
                );
            }
            filing
        }))
    }

    /// One intake cycle: resume staged filings left unfinished, stage new
    /// filings, open a batch per market and run every filing through the pool.
    ///
    /// A market whose batch cannot be opened keeps its filings staged for the
    /// next cycle; the other markets proceed.
    pub async fn poll_once(&self) -> CoordinatorResult<PollSummary> {
        let mut summary = PollSummary::default();
        let markets = self.owned_markets().await;

        let folders = self.folders.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let mut filings = tokio::task::spawn_blocking(move || {
            staging::unfinished_filings(&folders, &markets, |accession| {
                lock_set(&in_flight).contains(accession)
            })
        })
        .await
        .map_err(|e| CoordinatorError::staging(format!("resume sweep failed: {e}")))?;
        summary.resumed = filings.len();
        if summary.resumed > 0 {
            self.log.info(
                LogCategory::FileMovement,
                format!("Resuming {} unfinished staged filings", summary.resumed),
            );
        }

        if self.has_new_filings().await {
            let report = self.try_move_filings_to_processing_folder().await?;
            summary.staged = report.staged.len();
            summary.staging_failures = report.failures.len();
            filings.extend(report.staged);
        }
        if filings.is_empty() {
            return Ok(summary);
        }

        let mut by_market: BTreeMap<MarketId, Vec<FilingInfo>> = BTreeMap::new();
        for filing in filings {
            by_market.entry(filing.market_id).or_default().push(filing);
        }

        let mut handles = Vec::new();
        for (market_id, filings) in by_market {
            let batch_id = match self.pipeline.database().open_batch(market_id) {
                Ok(batch_id) => batch_id,
                Err(e) => {
                    summary.deferred += filings.len();
                    self.log.error(
                        LogCategory::Lifecycle,
                        format!(
                            "Cannot open a batch for market {market_id}, {} filings stay staged: {e}",
                            filings.len()
                        ),
                    );
                    continue;
                }
            };
            for filing in filings {
                match self.submit_filing(filing, batch_id) {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        summary.rejected += 1;
                        self.log.warn(LogCategory::FileMovement, e.to_string());
                    }
                }
            }
        }

        for handle in handles {
            match handle.await {
                Ok(filing) if filing.status == super::filing::FilingStatus::Exported => {
                    summary.exported += 1
                }
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    self.log
                        .error(LogCategory::RuleExecution, format!("Filing task lost: {e}"));
                }
            }
        }

        self.log.info(
            LogCategory::Lifecycle,
            format!(
                "Poll cycle: resumed={} staged={} exported={} failed={} rejected={} deferred={}",
                summary.resumed,
                summary.staged,
                summary.exported,
                summary.failed,
                summary.rejected,
                summary.deferred
            ),
        );
        Ok(summary)
    }

    /// Poll until `shutdown` turns true or its sender is dropped
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        self.log.error(LogCategory::Lifecycle, format!("Poll cycle failed: {e}"));
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.log.info(
            LogCategory::Lifecycle,
            format!("Processor '{}' stopped polling", self.server_key),
        );
    }

    async fn ensure_owned(&self, market_id: MarketId) -> CoordinatorResult<()> {
        if self.owns_market(market_id).await {
            Ok(())
        } else {
            Err(CoordinatorError::routing(format!(
                "processor '{}' does not own market {market_id}",
                self.server_key
            )))
        }
    }

    /// Export the report for one filing of a batch
    pub async fn create_batch_detail_export_file(
        &self,
        request: &BatchDetailExportRequest,
    ) -> CoordinatorResult<PathBuf> {
        self.ensure_owned(request.market_id).await?;

        let detail = self
            .pipeline
            .database()
            .batch_detail(request.batch_detail_id)?
            .filter(|detail| detail.market_id == request.market_id)
            .ok_or_else(|| {
                CoordinatorError::export(format!(
                    "batch detail {} not found for market {}",
                    request.batch_detail_id, request.market_id
                ))
            })?;

        let pipeline = Arc::clone(&self.pipeline);
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            pipeline.export(
                &detail,
                request.doc_id,
                &request.lang,
                request.format,
                request.replace,
            )
        })
        .await
        .map_err(|e| CoordinatorError::export(format!("export task failed: {e}")))?
    }

    /// Export every filing of a batch.
    ///
    /// Each file is attempted; failures are collected and reported together
    /// once every detail has been handled.
    pub async fn create_batch_export_files(
        &self,
        request: &BatchExportRequest,
    ) -> CoordinatorResult<Vec<PathBuf>> {
        self.ensure_owned(request.market_id).await?;

        let details: Vec<_> = self
            .pipeline
            .database()
            .batch_details(request.batch_id)?
            .into_iter()
            .filter(|detail| detail.market_id == request.market_id)
            .collect();
        if details.is_empty() {
            return Ok(Vec::new());
        }

        let total = details.len();
        let batch_id = request.batch_id;
        let log = self.log.clone();
        let progress = Arc::new(CompletionState::with_callback(
            0usize,
            total,
            move |status, done| {
                log.debug(
                    LogCategory::Export,
                    format!("Batch {batch_id} export {status:?} after {done} files"),
                );
            },
        ));
        let outcomes: Arc<Mutex<Vec<Result<PathBuf, String>>>> =
            Arc::new(Mutex::new(Vec::with_capacity(total)));

        for detail in details {
            let pool = Arc::clone(&self.pool);
            let pipeline = Arc::clone(&self.pipeline);
            let progress = Arc::clone(&progress);
            let outcomes = Arc::clone(&outcomes);
            let lang = request.lang.clone();
            let format = request.format;
            let replace = request.replace;

            tokio::spawn(async move {
                let accession = detail.accession_number.clone();
                let outcome = match pool.acquire_owned().await {
                    Ok(permit) => {
                        let exported = tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            pipeline.export(&detail, 0, &lang, format, replace)
                        })
                        .await;
                        match exported {
                            Ok(result) => result.map_err(|e| format!("{accession}: {e}")),
                            Err(e) => Err(format!("{accession}: export task failed: {e}")),
                        }
                    }
                    Err(_) => Err(format!("{accession}: worker pool is closed")),
                };
                outcomes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(outcome);
                progress.accumulate(1);
            });
        }

        if progress.wait().await != CompletionStatus::Complete {
            return Err(CoordinatorError::export(format!(
                "batch {} export was canceled",
                request.batch_id
            )));
        }

        let outcomes = std::mem::take(&mut *outcomes.lock().unwrap_or_else(PoisonError::into_inner));
        let (written, failures): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(Result::is_ok);
        let failures: Vec<String> = failures.into_iter().filter_map(Result::err).collect();
        let mut written: Vec<PathBuf> = written.into_iter().filter_map(Result::ok).collect();
        written.sort();

        self.log.info(
            LogCategory::Export,
            format!(
                "Batch {} export: {} written, {} failed",
                request.batch_id,
                written.len(),
                failures.len()
            ),
        );

        if failures.is_empty() {
            Ok(written)
        } else {
            Err(CoordinatorError::ExportAggregate { total, failures })
        }
    }
}

fn check_folder_access(path: &Path) -> CoordinatorResult<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CoordinatorError::folder_access(path, e.to_string()))?;
    if !metadata.is_dir() {
        return Err(CoordinatorError::folder_access(path, "not a directory"));
    }
    std::fs::read_dir(path)
        .map_err(|e| CoordinatorError::folder_access(path, format!("cannot list: {e}")))?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let marker = path.join(format!(".access-check-{}-{nanos}", std::process::id()));
    std::fs::write(&marker, b"check")
        .map_err(|e| CoordinatorError::folder_access(path, format!("cannot write: {e}")))?;
    std::fs::remove_file(&marker)
        .map_err(|e| CoordinatorError::folder_access(path, format!("cannot delete: {e}")))?;
    Ok(())
}
