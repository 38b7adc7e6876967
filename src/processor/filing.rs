//! Filing identity, derived document paths and processing lifecycle

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::messages::MarketId;
use crate::rules::{ContextValue, Record};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

static ACCESSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{10}-\d{2}-\d{6}$").expect("accession pattern is valid"));

// <ticker>-<yyyymmdd>.xml
static INSTANCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<ticker>[A-Za-z0-9.]+)-(?P<date>\d{8})\.xml$")
        .expect("instance pattern is valid")
});

/// Whether a folder name is a well-formed accession number
pub fn is_accession_number(name: &str) -> bool {
    ACCESSION_PATTERN.is_match(name)
}

/// Processing state of a filing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FilingStatus {
    Discovered,
    Staged,
    RuleProcessed,
    Exported,
    Failed { reason: String },
}

impl FilingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FilingStatus::Exported | FilingStatus::Failed { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            FilingStatus::Discovered => "discovered",
            FilingStatus::Staged => "staged",
            FilingStatus::RuleProcessed => "rule_processed",
            FilingStatus::Exported => "exported",
            FilingStatus::Failed { .. } => "failed",
        }
    }

    fn can_become(&self, next: &FilingStatus) -> bool {
        match (self, next) {
            (current, FilingStatus::Failed { .. }) => !current.is_terminal(),
            (FilingStatus::Discovered, FilingStatus::Staged)
            | (FilingStatus::Staged, FilingStatus::RuleProcessed)
            | (FilingStatus::RuleProcessed, FilingStatus::Exported) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FilingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilingStatus::Failed { reason } => write!(f, "failed ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Documents found inside a filing folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilingDocuments {
    pub ticker: String,
    /// Period end as written in the file name (`yyyymmdd`)
    pub period: String,
    pub instance_document: PathBuf,
    pub taxonomy_schema: PathBuf,
}

/// One filing, identified by its accession number within a market folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilingInfo {
    pub accession_number: String,
    pub market_id: MarketId,
    /// Folder that holds the accession folder
    pub parent_folder: PathBuf,
    pub status: FilingStatus,
}

impl FilingInfo {
    pub fn new(
        market_id: MarketId,
        parent_folder: impl Into<PathBuf>,
        accession_number: &str,
    ) -> CoordinatorResult<Self> {
        if !is_accession_number(accession_number) {
            return Err(CoordinatorError::staging(format!(
                "'{accession_number}' is not an accession number"
            )));
        }
        Ok(Self {
            accession_number: accession_number.to_string(),
            market_id,
            parent_folder: parent_folder.into(),
            status: FilingStatus::Discovered,
        })
    }

    /// `parent/accession`
    pub fn folder(&self) -> PathBuf {
        self.parent_folder.join(&self.accession_number)
    }

    /// Locate the instance document actually present in the filing folder
    /// and derive the taxonomy schema path from it.
    ///
    /// Returns `None` when the folder holds no `<ticker>-<date>.xml` file.
    /// When several match, the lexically first one wins.
    pub fn documents(&self) -> Option<FilingDocuments> {
        let folder = self.folder();
        let mut names: Vec<String> = fs::read_dir(&folder)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| INSTANCE_PATTERN.is_match(name))
            .collect();
        names.sort();
        let name = names.into_iter().next()?;
        documents_for(&folder, &name)
    }

    /// Record a lifecycle step, rejecting out-of-order transitions
    pub fn transition(&mut self, next: FilingStatus) -> CoordinatorResult<()> {
        if !self.status.can_become(&next) {
            return Err(CoordinatorError::InvalidTransition {
                accession: self.accession_number.clone(),
                from: self.status.name().to_string(),
                to: next.name().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the filing failed unless it already reached a terminal state
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = FilingStatus::Failed {
                reason: reason.into(),
            };
        }
    }

    /// Field map bound into rule sessions as `Filing`
    pub fn to_record(&self) -> Record {
        let record = Record::new()
            .with_field("AccessionNumber", self.accession_number.as_str())
            .with_field("MarketId", i64::from(self.market_id))
            .with_field("Folder", ContextValue::Path(self.folder()));
        if let Some(documents) = self.documents() {
            record.set("Ticker", documents.ticker);
            record.set("Period", documents.period);
            record.set("InstanceDocument", documents.instance_document);
            record.set("TaxonomySchema", documents.taxonomy_schema);
        }
        record
    }
}

fn documents_for(folder: &Path, instance_name: &str) -> Option<FilingDocuments> {
    let captures = INSTANCE_PATTERN.captures(instance_name)?;
    let instance_document = folder.join(instance_name);
    Some(FilingDocuments {
        ticker: captures["ticker"].to_string(),
        period: captures["date"].to_string(),
        taxonomy_schema: instance_document.with_extension("xsd"),
        instance_document,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_accession_number_format() {
        assert!(is_accession_number("0000008670-08-000046"));
        assert!(!is_accession_number("0000008670-08-00004"));
        assert!(!is_accession_number("000000867A-08-000046"));
        assert!(!is_accession_number("notes"));
        assert!(FilingInfo::new(1, "/data", "bad").is_err());
    }

    #[test]
    fn test_derives_document_paths_from_present_file() {
        let root = TempDir::new().unwrap();
        let folder = root.path().join("0000008670-08-000046");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("adp-20080331.xml"), "<xbrl/>").unwrap();
        fs::write(folder.join("adp-20080331_lab.xml"), "<linkbase/>").unwrap();

        let filing = FilingInfo::new(7, root.path(), "0000008670-08-000046").unwrap();
        let documents = filing.documents().unwrap();

        assert_eq!(filing.folder(), folder);
        assert_eq!(documents.ticker, "adp");
        assert_eq!(documents.period, "20080331");
        assert_eq!(documents.instance_document, folder.join("adp-20080331.xml"));
        assert_eq!(documents.taxonomy_schema, folder.join("adp-20080331.xsd"));
    }

    #[test]
    fn test_missing_instance_document() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("0000008670-08-000046")).unwrap();
        let filing = FilingInfo::new(7, root.path(), "0000008670-08-000046").unwrap();
        assert!(filing.documents().is_none());
    }

    #[test]
    fn test_lifecycle_transitions_are_checked() {
        let mut filing = FilingInfo::new(1, "/data", "0000008670-08-000046").unwrap();

        assert!(filing.transition(FilingStatus::RuleProcessed).is_err());
        filing.transition(FilingStatus::Staged).unwrap();
        filing.transition(FilingStatus::RuleProcessed).unwrap();
        filing.transition(FilingStatus::Exported).unwrap();

        let err = filing
            .transition(FilingStatus::Failed {
                reason: "late".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
        assert_eq!(filing.status, FilingStatus::Exported);
    }

    #[test]
    fn test_fail_from_any_open_state() {
        let mut filing = FilingInfo::new(1, "/data", "0000008670-08-000046").unwrap();
        filing.transition(FilingStatus::Staged).unwrap();
        filing.fail("rule 'CheckDates' failed");
        assert_eq!(filing.status.to_string(), "failed (rule 'CheckDates' failed)");

        filing.fail("second reason");
        assert_eq!(
            filing.status,
            FilingStatus::Failed {
                reason: "rule 'CheckDates' failed".to_string()
            }
        );
    }

    #[test]
    fn test_record_exposes_documents() {
        let root = TempDir::new().unwrap();
        let folder = root.path().join("0000008670-08-000046");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("adp-20080331.xml"), "<xbrl/>").unwrap();

        let filing = FilingInfo::new(7, root.path(), "0000008670-08-000046").unwrap();
        let record = filing.to_record();

        assert_eq!(record.get("Ticker"), Some(ContextValue::from("adp")));
        assert_eq!(record.get("MarketId"), Some(ContextValue::Integer(7)));
    }
}
