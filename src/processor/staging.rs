//! Intake detection and staging
//!
//! Filings arrive as accession folders under `<intake>/<market_id>/`. Staging
//! moves each one to `<processing>/<market_id>/` with a single rename, which
//! is the exclusive claim on the filing: whoever renames it owns it, and a
//! concurrent claimant sees the source vanish.
//!
//! A filing that reaches a terminal state gets an outcome marker inside its
//! accession folder. Staged folders without a marker were never finished
//! (a crash, or a batch that could not be opened) and are resumed by the next
//! poll.

use super::filing::{is_accession_number, FilingInfo, FilingStatus};
use super::folders::DependentFolders;
use crate::observability::{LogCategory, Logger};
use crate::protocol::messages::MarketId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A filing that could not be staged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingFailure {
    pub source: PathBuf,
    pub message: String,
}

/// Outcome of one staging pass
#[derive(Debug, Default)]
pub struct StagingReport {
    pub staged: Vec<FilingInfo>,
    pub failures: Vec<StagingFailure>,
}

impl StagingReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// File written into an accession folder once its filing is finished
pub const OUTCOME_MARKER: &str = ".filing-outcome.json";

/// Persist the terminal status of a filing beside its documents
pub async fn record_outcome(filing: &FilingInfo) -> io::Result<()> {
    let content = serde_json::to_vec_pretty(&filing.status)?;
    tokio::fs::write(filing.folder().join(OUTCOME_MARKER), content).await
}

/// Staged filings of the given markets that never reached a terminal state.
///
/// Accessions for which `in_flight` answers true are skipped.
pub fn unfinished_filings(
    folders: &DependentFolders,
    markets: &[MarketId],
    in_flight: impl Fn(&str) -> bool,
) -> Vec<FilingInfo> {
    let mut unfinished = Vec::new();
    for &market_id in markets {
        let processing = folders.processing_for(market_id);
        let Ok(names) = pending_filings(&processing) else {
            continue;
        };
        for name in names {
            if in_flight(&name) || processing.join(&name).join(OUTCOME_MARKER).exists() {
                continue;
            }
            if let Ok(mut filing) = FilingInfo::new(market_id, &processing, &name) {
                if filing.transition(FilingStatus::Staged).is_ok() {
                    unfinished.push(filing);
                }
            }
        }
    }
    unfinished
}

/// Accession folders directly under `parent`
fn pending_filings(parent: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            if is_accession_number(&name) {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Whether any owned market has an accession folder waiting in intake
pub fn has_new_filings(folders: &DependentFolders, markets: &[MarketId]) -> bool {
    markets.iter().any(|&market_id| {
        pending_filings(&folders.intake_for(market_id))
            .map(|names| !names.is_empty())
            .unwrap_or(false)
    })
}

/// Move every waiting filing of the given markets into the processing
/// folder, one accession folder at a time.
///
/// A failure on one filing is recorded and the pass continues with the rest.
pub fn try_move_filings_to_processing_folder(
    folders: &DependentFolders,
    markets: &[MarketId],
    log: &Logger,
) -> StagingReport {
    let mut report = StagingReport::default();

    for &market_id in markets {
        let intake = folders.intake_for(market_id);
        let names = match pending_filings(&intake) {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                report.failures.push(StagingFailure {
                    source: intake,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if names.is_empty() {
            continue;
        }

        let destination_root = folders.processing_for(market_id);
        if let Err(e) = fs::create_dir_all(&destination_root) {
            for name in names {
                report.failures.push(StagingFailure {
                    source: intake.join(name),
                    message: format!("cannot create {}: {e}", destination_root.display()),
                });
            }
            continue;
        }

        for name in names {
            let source = intake.join(&name);
            match stage_one(&source, &destination_root, market_id, &name) {
                Ok(Some(filing)) => {
                    log.debug(
                        LogCategory::FileMovement,
                        format!("Staged {} to {}", source.display(), filing.folder().display()),
                    );
                    report.staged.push(filing);
                }
                Ok(None) => {
                    log.debug(
                        LogCategory::FileMovement,
                        format!("{} was claimed by another worker", source.display()),
                    );
                }
                Err(message) => {
                    log.warn(
                        LogCategory::FileMovement,
                        format!("Failed to stage {}: {message}", source.display()),
                    );
                    report.failures.push(StagingFailure { source, message });
                }
            }
        }
    }

    if !report.staged.is_empty() || !report.failures.is_empty() {
        log.info(
            LogCategory::FileMovement,
            format!(
                "Staging pass: {} staged, {} failed",
                report.staged.len(),
                report.failures.len()
            ),
        );
    }
    report
}

/// `Ok(None)` when the source disappeared before the rename
fn stage_one(
    source: &Path,
    destination_root: &Path,
    market_id: MarketId,
    accession: &str,
) -> Result<Option<FilingInfo>, String> {
    let mut filing = FilingInfo::new(market_id, destination_root, accession)
        .map_err(|e| e.to_string())?;
    let destination = filing.folder();

    if destination.exists() {
        return Err(format!(
            "{} is already staged at {}",
            accession,
            destination.display()
        ));
    }

    match fs::rename(source, &destination) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    }

    filing
        .transition(FilingStatus::Staged)
        .map_err(|e| e.to_string())?;
    Ok(Some(filing))
}
