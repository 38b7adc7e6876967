//! Client for the dispatcher contract
//!
//! Used by processors to register themselves and restore their markets, and by
//! the operator CLI for every administrative command.

use crate::error::CoordinatorResult;
use crate::protocol::http::RemoteCaller;
use crate::protocol::messages::{
    AssignMarketRequest, BatchDetailExportRequest, BatchExportRequest, FolderAccessRequest,
    LoadTaxonomyRequest, MarketId, MarketLookupRequest, ProcessorSummary,
    RegisterProcessorRequest, ServerKeyRequest,
};
use crate::protocol::routes::{dispatcher as route, endpoint};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DispatcherClient {
    base_uri: String,
    caller: RemoteCaller,
}

impl DispatcherClient {
    pub fn new(base_uri: impl Into<String>, timeout: Duration, retry_attempts: usize) -> Self {
        Self {
            base_uri: base_uri.into(),
            caller: RemoteCaller::new(timeout, retry_attempts),
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    fn url(&self, route: &str) -> String {
        endpoint(&self.base_uri, route)
    }

    pub async fn register_processor(&self, uri: &str, server_key: &str) -> CoordinatorResult<()> {
        let request = RegisterProcessorRequest {
            uri: uri.to_string(),
            server_key: server_key.to_string(),
        };
        self.caller
            .post(&self.url(route::REGISTER_PROCESSOR), &request)
            .await
    }

    /// Returns the markets left unassigned by the removal
    pub async fn unregister_processor(&self, server_key: &str) -> CoordinatorResult<Vec<MarketId>> {
        let request = ServerKeyRequest {
            server_key: server_key.to_string(),
        };
        self.caller
            .post(&self.url(route::UNREGISTER_PROCESSOR), &request)
            .await
    }

    pub async fn get_processors(&self) -> CoordinatorResult<Vec<ProcessorSummary>> {
        self.caller.get(&self.url(route::PROCESSORS)).await
    }

    pub async fn get_unassigned_processors(&self) -> CoordinatorResult<Vec<ProcessorSummary>> {
        self.caller.get(&self.url(route::UNASSIGNED_PROCESSORS)).await
    }

    pub async fn get_processor(&self, market_id: MarketId) -> CoordinatorResult<Option<String>> {
        self.caller
            .post(&self.url(route::PROCESSOR), &MarketLookupRequest { market_id })
            .await
    }

    pub async fn get_processor_markets(&self, server_key: &str) -> CoordinatorResult<Vec<MarketId>> {
        let request = ServerKeyRequest {
            server_key: server_key.to_string(),
        };
        self.caller
            .post(&self.url(route::PROCESSOR_MARKETS), &request)
            .await
    }

    pub async fn assign_market(&self, server_key: &str, market_id: MarketId) -> CoordinatorResult<()> {
        let request = AssignMarketRequest {
            server_key: server_key.to_string(),
            market_id,
        };
        self.caller
            .post(&self.url(route::ASSIGN_MARKET), &request)
            .await
    }

    pub async fn load_taxonomy(&self, server_key: &str, taxonomy_path: &str) -> CoordinatorResult<()> {
        let request = LoadTaxonomyRequest {
            server_key: server_key.to_string(),
            taxonomy_path: taxonomy_path.to_string(),
        };
        self.caller
            .post(&self.url(route::LOAD_TAXONOMY), &request)
            .await
    }

    pub async fn can_processor_access_folder(
        &self,
        server_key: &str,
        folder_path: &str,
    ) -> CoordinatorResult<()> {
        let request = FolderAccessRequest {
            server_key: server_key.to_string(),
            folder_path: folder_path.to_string(),
        };
        self.caller
            .post(&self.url(route::FOLDER_ACCESS), &request)
            .await
    }

    pub async fn create_batch_detail_export_file(
        &self,
        request: &BatchDetailExportRequest,
    ) -> CoordinatorResult<String> {
        self.caller
            .post(&self.url(route::BATCH_DETAIL_EXPORT), request)
            .await
    }

    pub async fn create_batch_export_files(
        &self,
        request: &BatchExportRequest,
    ) -> CoordinatorResult<Vec<String>> {
        self.caller.post(&self.url(route::BATCH_EXPORT), request).await
    }
}
