//! Dispatcher service
//!
//! Tracks which processor owns which market and forwards administrative and
//! export requests to the owner. Table mutations go through
//! [`ProcessorRegistry`]; remote calls go through a [`ProcessorConnector`], so
//! the service never holds the registry lock across an await.

use super::client::{ProcessorClient, ProcessorConnector};
use super::registry::{MarketOwner, ProcessorRegistry, RegistrationOutcome};
use crate::config::{validate_server_key, validate_uri};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::observability::{LogCategory, Logger};
use crate::protocol::messages::{
    BatchDetailExportRequest, BatchExportRequest, MarketId, ProcessorSummary,
};
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

pub struct Dispatcher {
    registry: ProcessorRegistry,
    connector: Arc<dyn ProcessorConnector>,
    log: Logger,
}

impl Dispatcher {
    pub fn new(connector: Arc<dyn ProcessorConnector>, log: Logger) -> Self {
        Self {
            registry: ProcessorRegistry::new(),
            connector,
            log,
        }
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Register a processor under `server_key`. Re-registering an existing
    /// key refreshes its URI and keeps its markets.
    pub fn register_processor(
        &self,
        uri: &str,
        server_key: &str,
    ) -> CoordinatorResult<RegistrationOutcome> {
        validate_server_key(server_key)
            .map_err(|e| CoordinatorError::registration(e.to_string()))?;
        validate_uri(uri).map_err(|e| CoordinatorError::registration(e.to_string()))?;

        let outcome = self.registry.register(server_key, uri);
        self.log.info(
            LogCategory::Registration,
            format!("{server_key} at {uri}: {outcome:?}"),
        );
        Ok(outcome)
    }

    /// Remove a registration. Markets it owned stay unassigned until an
    /// operator assigns them again.
    pub fn unregister_processor(&self, server_key: &str) -> CoordinatorResult<Vec<MarketId>> {
        let orphaned = self.registry.unregister(server_key).ok_or_else(|| {
            CoordinatorError::registration(format!("processor '{server_key}' is not registered"))
        })?;

        self.log.info(
            LogCategory::Registration,
            format!("{server_key} unregistered"),
        );
        if !orphaned.is_empty() {
            self.log.warn(
                LogCategory::Assignment,
                format!("{server_key} unregistered; markets {orphaned:?} are now unassigned"),
            );
        }
        Ok(orphaned)
    }

    pub fn get_processors(&self) -> Vec<ProcessorSummary> {
        self.registry.processors()
    }

    pub fn get_unassigned_processors(&self) -> Vec<ProcessorSummary> {
        self.registry.unassigned_processors()
    }

    /// Server key of the market's owner, or `None` when unassigned
    pub fn get_processor(&self, market_id: MarketId) -> Option<String> {
        self.registry
            .owner_of(market_id)
            .map(|owner| owner.server_key)
    }

    pub fn get_processor_markets(&self, server_key: &str) -> CoordinatorResult<Vec<MarketId>> {
        self.registry.markets_of(server_key).ok_or_else(|| {
            CoordinatorError::registration(format!("processor '{server_key}' is not registered"))
        })
    }

    /// Move `market_id` to `server_key` and tell the new owner.
    ///
    /// The table change is committed first. If the new owner cannot be told,
    /// the change is reverted and the notification error returned. The
    /// previous owner is asked to release the market; a failure there is only
    /// logged since the tables already name the new owner.
    pub async fn assign_market(&self, server_key: &str, market_id: MarketId) -> CoordinatorResult<()> {
        let span = crate::routing_span!(market_id, server_key, operation = "assign_market");
        async {
            let change = self.registry.assign(server_key, market_id)?;
            let client = self.connector.connect(&change.owner.uri);

            if let Err(e) = client.assign_market(market_id).await {
                let reverted = self.registry.revert(&change);
                self.log.error(
                    LogCategory::Assignment,
                    format!("{server_key} refused market {market_id} (reverted: {reverted}): {e}"),
                );
                return Err(e);
            }

            self.log.info(
                LogCategory::Assignment,
                format!("market {market_id} assigned to {server_key}"),
            );

            if let Some(previous) = change.previous {
                let previous_client = self.connector.connect(&previous.uri);
                if let Err(e) = previous_client.release_market(market_id).await {
                    self.log.warn(
                        LogCategory::Assignment,
                        format!(
                            "{} did not release market {market_id}: {e}",
                            previous.server_key
                        ),
                    );
                }
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    pub async fn load_taxonomy(&self, server_key: &str, taxonomy_path: &str) -> CoordinatorResult<()> {
        let client = self.client_for(server_key)?;
        client.load_taxonomy(taxonomy_path).await?;
        self.log.info(
            LogCategory::Taxonomy,
            format!("{server_key} loaded taxonomy {taxonomy_path}"),
        );
        Ok(())
    }

    pub async fn can_processor_access_folder(
        &self,
        server_key: &str,
        folder_path: &str,
    ) -> CoordinatorResult<()> {
        let client = self.client_for(server_key)?;
        client.can_access_folder(folder_path).await
    }

    /// Forward a single report export to the market's owner
    pub async fn create_batch_detail_export_file(
        &self,
        request: &BatchDetailExportRequest,
    ) -> CoordinatorResult<String> {
        self.route_to_owner(request.market_id, "batch_detail_export", |client| async move {
            client.batch_detail_export(request).await
        })
        .await
    }

    /// Forward a batch export to the market's owner
    pub async fn create_batch_export_files(
        &self,
        request: &BatchExportRequest,
    ) -> CoordinatorResult<Vec<String>> {
        self.route_to_owner(request.market_id, "batch_export", |client| async move {
            client.batch_export(request).await
        })
        .await
    }

    fn client_for(&self, server_key: &str) -> CoordinatorResult<Arc<dyn ProcessorClient>> {
        let registration = self.registry.get(server_key).ok_or_else(|| {
            CoordinatorError::routing(format!("processor '{server_key}' is not registered"))
        })?;
        Ok(self.connector.connect(&registration.uri))
    }

    /// Look up the owner, forward, then check the owner did not change while
    /// the call was in flight. A move is reported as a retryable
    /// [`CoordinatorError::OwnershipChanged`].
    async fn route_to_owner<T, F, Fut>(
        &self,
        market_id: MarketId,
        operation: &'static str,
        call: F,
    ) -> CoordinatorResult<T>
    where
        F: FnOnce(Arc<dyn ProcessorClient>) -> Fut,
        Fut: Future<Output = CoordinatorResult<T>>,
    {
        let span = crate::routing_span!(market_id, operation);
        async {
            let owner = self.registry.owner_of(market_id).ok_or_else(|| {
                CoordinatorError::routing(format!("market {market_id} is not assigned"))
            })?;
            self.log.debug(
                LogCategory::Routing,
                format!("{operation} for market {market_id} -> {}", owner.server_key),
            );

            let result = call(self.connector.connect(&owner.uri)).await;
            self.ensure_still_owner(market_id, &owner)?;
            result
        }
        .instrument(span)
        .await
    }

    fn ensure_still_owner(&self, market_id: MarketId, expected: &MarketOwner) -> CoordinatorResult<()> {
        let current = self.registry.owner_of(market_id);
        if current.as_ref().map(|owner| &owner.server_key) == Some(&expected.server_key) {
            return Ok(());
        }

        let actual = current.map(|owner| owner.server_key);
        self.log.warn(
            LogCategory::Routing,
            format!(
                "market {market_id} moved from {} to {actual:?} during forwarding",
                expected.server_key
            ),
        );
        Err(CoordinatorError::ownership_changed(
            market_id,
            expected.server_key.clone(),
            actual,
        ))
    }
}
