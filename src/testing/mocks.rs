//! Mock implementations for testing
//!
//! Provides an in-memory processor fleet for the dispatcher's
//! [`ProcessorConnector`] seam, recording every call so tests can assert on
//! forwarding without running processor servers.

use crate::dispatcher::client::{ProcessorClient, ProcessorConnector};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::messages::{
    BatchDetailExportRequest, BatchExportRequest, BatchDetailId, BatchId, MarketId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One call received by a [`MockProcessorClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorCall {
    AssignMarket(MarketId),
    ReleaseMarket(MarketId),
    LoadTaxonomy(String),
    FolderAccess(String),
    BatchDetailExport(MarketId, BatchDetailId),
    BatchExport(MarketId, BatchId),
}

type ExportHook = Box<dyn Fn() + Send + Sync>;

/// Mock processor that records calls and fails on request
#[derive(Default)]
pub struct MockProcessorClient {
    calls: Mutex<Vec<ProcessorCall>>,
    fail_assignments: AtomicBool,
    fail_releases: AtomicBool,
    fail_folder_access: AtomicBool,
    fail_exports: AtomicBool,
    export_hook: std::sync::Mutex<Option<ExportHook>>,
}

impl MockProcessorClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<ProcessorCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.calls.lock().await.clear();
    }

    pub fn fail_assignments(&self, fail: bool) {
        self.fail_assignments.store(fail, Ordering::SeqCst);
    }

    pub fn fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }

    pub fn fail_folder_access(&self, fail: bool) {
        self.fail_folder_access.store(fail, Ordering::SeqCst);
    }

    /// Answer exports with a definite failure, as a processor does for an
    /// unknown batch detail
    pub fn fail_exports(&self, fail: bool) {
        self.fail_exports.store(fail, Ordering::SeqCst);
    }

    /// Run `hook` while an export is being handled, e.g. to move the market
    /// to another processor mid-flight
    pub fn on_export(&self, hook: impl Fn() + Send + Sync + 'static) {
        let mut slot = self
            .export_hook
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(Box::new(hook));
    }

    async fn record(&self, call: ProcessorCall) {
        self.calls.lock().await.push(call);
    }

    fn run_export_hook(&self) {
        let slot = self
            .export_hook
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(hook) = slot.as_ref() {
            hook();
        }
    }
}

#[async_trait]
impl ProcessorClient for MockProcessorClient {
    async fn assign_market(&self, market_id: MarketId) -> CoordinatorResult<()> {
        self.record(ProcessorCall::AssignMarket(market_id)).await;
        if self.fail_assignments.load(Ordering::SeqCst) {
            return Err(CoordinatorError::remote_failed("mock processor refused the market"));
        }
        Ok(())
    }

    async fn release_market(&self, market_id: MarketId) -> CoordinatorResult<bool> {
        self.record(ProcessorCall::ReleaseMarket(market_id)).await;
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(CoordinatorError::remote("mock processor unreachable"));
        }
        Ok(true)
    }

    async fn load_taxonomy(&self, taxonomy_path: &str) -> CoordinatorResult<()> {
        self.record(ProcessorCall::LoadTaxonomy(taxonomy_path.to_string()))
            .await;
        Ok(())
    }

    async fn can_access_folder(&self, folder_path: &str) -> CoordinatorResult<()> {
        self.record(ProcessorCall::FolderAccess(folder_path.to_string()))
            .await;
        if self.fail_folder_access.load(Ordering::SeqCst) {
            return Err(CoordinatorError::folder_access(folder_path, "permission denied"));
        }
        Ok(())
    }

    async fn batch_detail_export(
        &self,
        request: &BatchDetailExportRequest,
    ) -> CoordinatorResult<String> {
        self.record(ProcessorCall::BatchDetailExport(
            request.market_id,
            request.batch_detail_id,
        ))
        .await;
        self.run_export_hook();
        if self.fail_exports.load(Ordering::SeqCst) {
            return Err(CoordinatorError::remote_failed(format!(
                "Export failed: batch detail {} not found",
                request.batch_detail_id
            )));
        }
        Ok(format!(
            "/reports/{}/{}.{}",
            request.market_id,
            request.batch_detail_id,
            request.format.extension()
        ))
    }

    async fn batch_export(&self, request: &BatchExportRequest) -> CoordinatorResult<Vec<String>> {
        self.record(ProcessorCall::BatchExport(request.market_id, request.batch_id))
            .await;
        self.run_export_hook();
        if self.fail_exports.load(Ordering::SeqCst) {
            return Err(CoordinatorError::remote_failed(format!(
                "Export failed: batch {} not found",
                request.batch_id
            )));
        }
        Ok(vec![format!(
            "/reports/{}/batch-{}.{}",
            request.market_id,
            request.batch_id,
            request.format.extension()
        )])
    }
}

/// Connector that hands out one [`MockProcessorClient`] per URI
#[derive(Default)]
pub struct MockProcessorFleet {
    clients: std::sync::Mutex<HashMap<String, Arc<MockProcessorClient>>>,
}

impl MockProcessorFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mock behind `uri`, created on first use
    pub fn client(&self, uri: &str) -> Arc<MockProcessorClient> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        clients
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(MockProcessorClient::new()))
            .clone()
    }
}

impl ProcessorConnector for MockProcessorFleet {
    fn connect(&self, uri: &str) -> Arc<dyn ProcessorClient> {
        self.client(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fleet_reuses_clients_per_uri() {
        let fleet = MockProcessorFleet::new();
        fleet.connect("http://a:9100").assign_market(1).await.unwrap();
        fleet.connect("http://a:9100").assign_market(2).await.unwrap();

        assert_eq!(
            fleet.client("http://a:9100").calls().await,
            vec![ProcessorCall::AssignMarket(1), ProcessorCall::AssignMarket(2)]
        );
        assert!(fleet.client("http://b:9100").calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let client = MockProcessorClient::new();
        client.fail_folder_access(true);
        assert!(client.can_access_folder("/x").await.is_err());
        client.fail_folder_access(false);
        assert!(client.can_access_folder("/x").await.is_ok());

        client.clear_history().await;
        assert!(client.calls().await.is_empty());
    }
}
