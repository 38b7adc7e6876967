//! Dispatcher-side view of the processor contract
//!
//! The dispatcher only ever talks to processors through [`ProcessorClient`];
//! [`ProcessorConnector`] turns a registered URI into a client. The HTTP
//! implementation forwards each call to the processor's warp surface.

use crate::error::CoordinatorResult;
use crate::protocol::http::RemoteCaller;
use crate::protocol::messages::{
    BatchDetailExportRequest, BatchExportRequest, FolderPathRequest, MarketId, MarketRequest,
    TaxonomyPathRequest,
};
use crate::protocol::routes::{endpoint, processor as route};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Remote operations a processor exposes to the dispatcher
#[async_trait]
pub trait ProcessorClient: Send + Sync {
    async fn assign_market(&self, market_id: MarketId) -> CoordinatorResult<()>;

    /// Returns whether the processor owned the market
    async fn release_market(&self, market_id: MarketId) -> CoordinatorResult<bool>;

    async fn load_taxonomy(&self, taxonomy_path: &str) -> CoordinatorResult<()>;

    async fn can_access_folder(&self, folder_path: &str) -> CoordinatorResult<()>;

    /// Returns the path of the written report
    async fn batch_detail_export(
        &self,
        request: &BatchDetailExportRequest,
    ) -> CoordinatorResult<String>;

    /// Returns the paths of every written report
    async fn batch_export(&self, request: &BatchExportRequest) -> CoordinatorResult<Vec<String>>;
}

/// Builds a client for a registered processor URI
pub trait ProcessorConnector: Send + Sync {
    fn connect(&self, uri: &str) -> Arc<dyn ProcessorClient>;
}

/// [`ProcessorClient`] over the processor's HTTP surface
#[derive(Debug, Clone)]
pub struct HttpProcessorClient {
    base_uri: String,
    caller: RemoteCaller,
}

impl HttpProcessorClient {
    pub fn new(base_uri: impl Into<String>, caller: RemoteCaller) -> Self {
        Self {
            base_uri: base_uri.into(),
            caller,
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    fn url(&self, route: &str) -> String {
        endpoint(&self.base_uri, route)
    }
}

#[async_trait]
impl ProcessorClient for HttpProcessorClient {
    async fn assign_market(&self, market_id: MarketId) -> CoordinatorResult<()> {
        self.caller
            .post(&self.url(route::ASSIGN_MARKET), &MarketRequest { market_id })
            .await
    }

    async fn release_market(&self, market_id: MarketId) -> CoordinatorResult<bool> {
        self.caller
            .post(&self.url(route::RELEASE_MARKET), &MarketRequest { market_id })
            .await
    }

    async fn load_taxonomy(&self, taxonomy_path: &str) -> CoordinatorResult<()> {
        let request = TaxonomyPathRequest {
            taxonomy_path: taxonomy_path.to_string(),
        };
        self.caller
            .post(&self.url(route::LOAD_TAXONOMY), &request)
            .await
    }

    async fn can_access_folder(&self, folder_path: &str) -> CoordinatorResult<()> {
        let request = FolderPathRequest {
            folder_path: folder_path.to_string(),
        };
        self.caller
            .post(&self.url(route::FOLDER_ACCESS), &request)
            .await
    }

    async fn batch_detail_export(
        &self,
        request: &BatchDetailExportRequest,
    ) -> CoordinatorResult<String> {
        self.caller
            .post(&self.url(route::BATCH_DETAIL_EXPORT), request)
            .await
    }

    async fn batch_export(&self, request: &BatchExportRequest) -> CoordinatorResult<Vec<String>> {
        self.caller.post(&self.url(route::BATCH_EXPORT), request).await
    }
}

/// Connector handing out [`HttpProcessorClient`]s that share one HTTP pool
#[derive(Debug, Clone)]
pub struct HttpProcessorConnector {
    caller: RemoteCaller,
}

impl HttpProcessorConnector {
    pub fn new(timeout: Duration, retry_attempts: usize) -> Self {
        Self {
            caller: RemoteCaller::new(timeout, retry_attempts),
        }
    }
}

impl ProcessorConnector for HttpProcessorConnector {
    fn connect(&self, uri: &str) -> Arc<dyn ProcessorClient> {
        Arc::new(HttpProcessorClient::new(uri, self.caller.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoordinatorError;
    use crate::protocol::messages::ReportFormat;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Arc<dyn ProcessorClient> {
        HttpProcessorConnector::new(Duration::from_secs(5), 0).connect(&server.uri())
    }

    #[tokio::test]
    async fn test_assign_market_posts_market_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/assign_market"))
            .and(body_json(json!({"market_id": 12})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).assign_market(12).await.unwrap();
    }

    #[tokio::test]
    async fn test_folder_access_failure_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/folder_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"success": false, "error": "Folder access error for /mnt/x: permission denied"}),
            ))
            .mount(&server)
            .await;

        let err = client(&server).can_access_folder("/mnt/x").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::RemoteFailed { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_batch_export_returns_paths() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batch_export"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "value": ["/reports/3/a.htm", "/reports/3/b.htm"]
            })))
            .mount(&server)
            .await;

        let request = BatchExportRequest {
            market_id: 3,
            batch_id: 9,
            lang: "en".to_string(),
            format: ReportFormat::Html,
            replace: false,
        };
        let paths = client(&server).batch_export(&request).await.unwrap();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_base_uri_is_kept() {
        let client = HttpProcessorClient::new(
            "http://proc-1:9100/",
            RemoteCaller::new(Duration::from_secs(1), 0),
        );
        assert_eq!(client.url(route::RELEASE_MARKET), "http://proc-1:9100/release_market");
        assert_eq!(client.base_uri(), "http://proc-1:9100/");
    }
}
