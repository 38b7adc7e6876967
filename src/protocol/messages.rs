//! Request and reply messages for the dispatcher and processor contracts
//!
//! Replies never carry transport-level failures: an operation that ran and
//! failed answers `success = false` with an error message, so callers can
//! tell "operation failed" apart from "transport failed".

use crate::error::CoordinatorError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market identifier, a taxonomy-scoped partition of filing work
pub type MarketId = i32;

/// Batch identifier owned by the database collaborator
pub type BatchId = i64;

/// Batch detail (one filing within a batch) identifier
pub type BatchDetailId = i64;

/// Output format requested for exported report artifacts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Html,
    Xml,
    Excel,
}

impl ReportFormat {
    /// File extension used for artifacts of this format
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Html => "htm",
            ReportFormat::Xml => "xml",
            ReportFormat::Excel => "xlsx",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportFormat::Html => "html",
            ReportFormat::Xml => "xml",
            ReportFormat::Excel => "excel",
        };
        f.write_str(name)
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "html" | "htm" => Ok(ReportFormat::Html),
            "xml" => Ok(ReportFormat::Xml),
            "excel" | "xlsx" => Ok(ReportFormat::Excel),
            other => Err(format!("unknown report format '{other}'")),
        }
    }
}

/// Uniform reply for every remote operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteReply<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the failure is a race the caller may retry (e.g. a market
    /// moved to another processor between lookup and forwarding)
    #[serde(default)]
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
}

impl<T> RemoteReply<T> {
    pub fn ok(value: T) -> Self {
        Self {
            success: true,
            error: None,
            retryable: false,
            value: Some(value),
        }
    }

    pub fn failed(error: &CoordinatorError) -> Self {
        Self {
            success: false,
            error: Some(error.to_reply_message()),
            retryable: error.is_retryable(),
            value: None,
        }
    }

    /// Fold an operation result into the bool + message convention
    pub fn from_result(result: Result<T, CoordinatorError>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::failed(&e),
        }
    }
}

impl<T: DeserializeOwned> RemoteReply<T> {
    /// Turn a received reply back into a result on the calling side
    ///
    /// A unit value travels as `null`, so a successful reply without a value
    /// is accepted whenever `T` can be read from `null`.
    pub fn into_result(self) -> Result<T, CoordinatorError> {
        if self.success {
            match self.value {
                Some(value) => Ok(value),
                None => T::deserialize(serde_json::Value::Null).map_err(|_| {
                    CoordinatorError::remote_failed("reply reported success without a value")
                }),
            }
        } else {
            let message = self
                .error
                .unwrap_or_else(|| "remote operation failed without a message".to_string());
            if self.retryable {
                Err(CoordinatorError::Retryable { message })
            } else {
                Err(CoordinatorError::RemoteFailed { message })
            }
        }
    }
}

/// Outcome of an operation that reports a flag plus an error message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationStatus {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationStatus {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

impl<T> From<Result<T, CoordinatorError>> for OperationStatus {
    fn from(result: Result<T, CoordinatorError>) -> Self {
        match result {
            Ok(_) => Self::succeeded(),
            Err(e) => Self::failed(e.to_reply_message()),
        }
    }
}

// ---- dispatcher-facing requests ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterProcessorRequest {
    pub uri: String,
    pub server_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerKeyRequest {
    pub server_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketLookupRequest {
    pub market_id: MarketId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignMarketRequest {
    pub server_key: String,
    pub market_id: MarketId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadTaxonomyRequest {
    pub server_key: String,
    pub taxonomy_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FolderAccessRequest {
    pub server_key: String,
    pub folder_path: String,
}

// ---- requests shared by both contracts ----

/// Export the report files for one filing of a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchDetailExportRequest {
    pub market_id: MarketId,
    pub batch_detail_id: BatchDetailId,
    pub doc_id: i64,
    pub lang: String,
    pub format: ReportFormat,
    pub replace: bool,
}

/// Export the report files for every filing of a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchExportRequest {
    pub market_id: MarketId,
    pub batch_id: BatchId,
    pub lang: String,
    pub format: ReportFormat,
    pub replace: bool,
}

// ---- processor-facing requests ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketRequest {
    pub market_id: MarketId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxonomyPathRequest {
    pub taxonomy_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FolderPathRequest {
    pub folder_path: String,
}

/// Snapshot of one registration as reported by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorSummary {
    pub server_key: String,
    pub uri: String,
    pub markets: Vec<MarketId>,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}
