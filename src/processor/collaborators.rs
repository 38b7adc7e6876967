//! External collaborators of a processor
//!
//! Market and batch storage, taxonomy loading and report rendering live
//! outside this crate. The processor reaches them only through these traits.
//! [`MarketCatalog`] and [`SummaryReportWriter`] are the built-in
//! implementations used when nothing richer is wired in.

use super::filing::FilingInfo;
use crate::config::MarketEntry;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::messages::{BatchDetailId, BatchId, MarketId, ReportFormat};
use crate::rules::RuleExecutionResult;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Market metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketInfo {
    pub market_id: MarketId,
    pub name: String,
    pub taxonomy_path: Option<PathBuf>,
}

/// One filing within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchDetail {
    pub batch_detail_id: BatchDetailId,
    pub batch_id: BatchId,
    pub market_id: MarketId,
    pub accession_number: String,
    /// Folder holding the filing documents
    pub filing_folder: PathBuf,
}

/// Storage for markets, batches and processing results
pub trait FilingDatabase: Send + Sync {
    fn market(&self, market_id: MarketId) -> CoordinatorResult<Option<MarketInfo>>;

    /// Load a taxonomy into the shared taxonomy cache
    fn load_taxonomy(&self, taxonomy_path: &Path) -> CoordinatorResult<()>;

    fn open_batch(&self, market_id: MarketId) -> CoordinatorResult<BatchId>;

    fn create_batch_detail(
        &self,
        batch_id: BatchId,
        filing: &FilingInfo,
    ) -> CoordinatorResult<BatchDetail>;

    fn batch_detail(&self, batch_detail_id: BatchDetailId) -> CoordinatorResult<Option<BatchDetail>>;

    fn batch_details(&self, batch_id: BatchId) -> CoordinatorResult<Vec<BatchDetail>>;

    fn record_rule_results(
        &self,
        batch_detail_id: BatchDetailId,
        results: &[RuleExecutionResult],
    ) -> CoordinatorResult<()>;

    fn record_export_file(&self, batch_detail_id: BatchDetailId, path: &Path) -> CoordinatorResult<()>;
}

/// What to render for one batch detail
#[derive(Debug, Clone)]
pub struct ReportRequest<'a> {
    pub detail: &'a BatchDetail,
    pub doc_id: i64,
    pub lang: &'a str,
    pub format: ReportFormat,
    pub destination: &'a Path,
}

/// Renders report artifacts
pub trait ReportWriter: Send + Sync {
    fn write_report(&self, request: &ReportRequest<'_>) -> CoordinatorResult<()>;
}

/// Writes a plain summary of the filing folder in place of a rendered
/// report
#[derive(Debug, Default, Clone)]
pub struct SummaryReportWriter;

impl ReportWriter for SummaryReportWriter {
    fn write_report(&self, request: &ReportRequest<'_>) -> CoordinatorResult<()> {
        let detail = request.detail;
        let mut documents: Vec<String> = fs::read_dir(&detail.filing_folder)
            .map_err(|e| {
                CoordinatorError::export(format!(
                    "cannot read {}: {e}",
                    detail.filing_folder.display()
                ))
            })?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();
        documents.sort();

        let header = format!(
            "accession={} market={} batch={} doc={} lang={} format={}",
            detail.accession_number,
            detail.market_id,
            detail.batch_id,
            request.doc_id,
            request.lang,
            request.format
        );
        let body = match request.format {
            ReportFormat::Html => format!(
                "<html><head><title>{}</title></head><body><p>{}</p><ul>{}</ul></body></html>\n",
                escape_markup(&detail.accession_number),
                escape_markup(&header),
                documents
                    .iter()
                    .map(|name| format!("<li>{}</li>", escape_markup(name)))
                    .collect::<String>()
            ),
            ReportFormat::Xml => format!(
                "<report accession=\"{}\" lang=\"{}\">{}</report>\n",
                escape_markup(&detail.accession_number),
                escape_markup(request.lang),
                documents
                    .iter()
                    .map(|name| format!("<document>{}</document>", escape_markup(name)))
                    .collect::<String>()
            ),
            ReportFormat::Excel => {
                let mut lines = vec![header];
                lines.extend(documents);
                lines.join("\n") + "\n"
            }
        };

        fs::write(request.destination, body).map_err(|e| {
            CoordinatorError::export(format!(
                "cannot write {}: {e}",
                request.destination.display()
            ))
        })
    }
}

/// Escape text for HTML and XML bodies and attribute values
fn escape_markup(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[derive(Debug, Default)]
struct CatalogState {
    next_batch_id: BatchId,
    next_detail_id: BatchDetailId,
    batches: BTreeMap<BatchId, MarketId>,
    details: BTreeMap<BatchDetailId, BatchDetail>,
    rule_results: HashMap<BatchDetailId, Vec<RuleExecutionResult>>,
    export_files: HashMap<BatchDetailId, Vec<PathBuf>>,
    loaded_taxonomies: HashSet<PathBuf>,
}

/// In-process market catalog and batch store
#[derive(Debug, Default)]
pub struct MarketCatalog {
    markets: HashMap<MarketId, MarketInfo>,
    state: Mutex<CatalogState>,
}

impl MarketCatalog {
    pub fn new(markets: impl IntoIterator<Item = MarketInfo>) -> Self {
        Self {
            markets: markets
                .into_iter()
                .map(|market| (market.market_id, market))
                .collect(),
            state: Mutex::new(CatalogState::default()),
        }
    }

    pub fn from_config(entries: &[MarketEntry]) -> Self {
        Self::new(entries.iter().map(|entry| MarketInfo {
            market_id: entry.id,
            name: entry.name.clone(),
            taxonomy_path: entry.taxonomy_path.clone(),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rule_results(&self, batch_detail_id: BatchDetailId) -> Vec<RuleExecutionResult> {
        self.lock()
            .rule_results
            .get(&batch_detail_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn export_files(&self, batch_detail_id: BatchDetailId) -> Vec<PathBuf> {
        self.lock()
            .export_files
            .get(&batch_detail_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_taxonomy_loaded(&self, taxonomy_path: &Path) -> bool {
        self.lock().loaded_taxonomies.contains(taxonomy_path)
    }
}

impl FilingDatabase for MarketCatalog {
    fn market(&self, market_id: MarketId) -> CoordinatorResult<Option<MarketInfo>> {
        Ok(self.markets.get(&market_id).cloned())
    }

    fn load_taxonomy(&self, taxonomy_path: &Path) -> CoordinatorResult<()> {
        if !taxonomy_path.is_file() {
            return Err(CoordinatorError::database(format!(
                "taxonomy {} does not exist",
                taxonomy_path.display()
            )));
        }
        self.lock()
            .loaded_taxonomies
            .insert(taxonomy_path.to_path_buf());
        Ok(())
    }

    fn open_batch(&self, market_id: MarketId) -> CoordinatorResult<BatchId> {
        let mut state = self.lock();
        state.next_batch_id += 1;
        let batch_id = state.next_batch_id;
        state.batches.insert(batch_id, market_id);
        Ok(batch_id)
    }

    fn create_batch_detail(
        &self,
        batch_id: BatchId,
        filing: &FilingInfo,
    ) -> CoordinatorResult<BatchDetail> {
        let mut state = self.lock();
        let market_id = *state
            .batches
            .get(&batch_id)
            .ok_or_else(|| CoordinatorError::database(format!("unknown batch {batch_id}")))?;
        state.next_detail_id += 1;
        let detail = BatchDetail {
            batch_detail_id: state.next_detail_id,
            batch_id,
            market_id,
            accession_number: filing.accession_number.clone(),
            filing_folder: filing.folder(),
        };
        state.details.insert(detail.batch_detail_id, detail.clone());
        Ok(detail)
    }

    fn batch_detail(&self, batch_detail_id: BatchDetailId) -> CoordinatorResult<Option<BatchDetail>> {
        Ok(self.lock().details.get(&batch_detail_id).cloned())
    }

    fn batch_details(&self, batch_id: BatchId) -> CoordinatorResult<Vec<BatchDetail>> {
        Ok(self
            .lock()
            .details
            .values()
            .filter(|detail| detail.batch_id == batch_id)
            .cloned()
            .collect())
    }

    fn record_rule_results(
        &self,
        batch_detail_id: BatchDetailId,
        results: &[RuleExecutionResult],
    ) -> CoordinatorResult<()> {
        self.lock()
            .rule_results
            .insert(batch_detail_id, results.to_vec());
        Ok(())
    }

    fn record_export_file(&self, batch_detail_id: BatchDetailId, path: &Path) -> CoordinatorResult<()> {
        let mut state = self.lock();
        let files = state.export_files.entry(batch_detail_id).or_default();
        if !files.iter().any(|existing| existing == path) {
            files.push(path.to_path_buf());
        }
        Ok(())
    }
}
