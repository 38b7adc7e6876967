//! HTTP surface of the dispatcher
//!
//! Mirrors the processor surface: `POST /<route>` with a JSON body, answered
//! with a [`RemoteReply`]. Listings are `GET`.

use super::service::Dispatcher;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::messages::{
    AssignMarketRequest, BatchDetailExportRequest, BatchExportRequest, FolderAccessRequest,
    LoadTaxonomyRequest, MarketLookupRequest, RegisterProcessorRequest, RemoteReply,
    ServerKeyRequest,
};
use crate::protocol::routes::{self, dispatcher as route};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

fn with_dispatcher(
    dispatcher: Arc<Dispatcher>,
) -> impl Filter<Extract = (Arc<Dispatcher>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&dispatcher))
}

/// `POST /<name>` taking a JSON body
fn post_route<T>(name: &'static str) -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::path(name)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
}

fn get_route(name: &'static str) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    warp::path(name).and(warp::path::end()).and(warp::get())
}

/// Route table for the dispatcher contract
pub fn routes(
    dispatcher: Arc<Dispatcher>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let register = post_route(route::REGISTER_PROCESSOR)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|request: RegisterProcessorRequest, dispatcher: Arc<Dispatcher>| async move {
            reply(
                dispatcher
                    .register_processor(&request.uri, &request.server_key)
                    .map(|_| ()),
            )
        });

    let unregister = post_route(route::UNREGISTER_PROCESSOR)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|request: ServerKeyRequest, dispatcher: Arc<Dispatcher>| async move {
            reply(dispatcher.unregister_processor(&request.server_key))
        });

    let processors = get_route(route::PROCESSORS)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|dispatcher: Arc<Dispatcher>| async move {
            reply(Ok(dispatcher.get_processors()))
        });

    let unassigned = get_route(route::UNASSIGNED_PROCESSORS)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|dispatcher: Arc<Dispatcher>| async move {
            reply(Ok(dispatcher.get_unassigned_processors()))
        });

    let processor = post_route(route::PROCESSOR)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|request: MarketLookupRequest, dispatcher: Arc<Dispatcher>| async move {
            reply(Ok(dispatcher.get_processor(request.market_id)))
        });

    let processor_markets = post_route(route::PROCESSOR_MARKETS)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|request: ServerKeyRequest, dispatcher: Arc<Dispatcher>| async move {
            reply(dispatcher.get_processor_markets(&request.server_key))
        });

    let assign = post_route(route::ASSIGN_MARKET)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|request: AssignMarketRequest, dispatcher: Arc<Dispatcher>| async move {
            reply(
                dispatcher
                    .assign_market(&request.server_key, request.market_id)
                    .await,
            )
        });

    let taxonomy = post_route(route::LOAD_TAXONOMY)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|request: LoadTaxonomyRequest, dispatcher: Arc<Dispatcher>| async move {
            reply(
                dispatcher
                    .load_taxonomy(&request.server_key, &request.taxonomy_path)
                    .await,
            )
        });

    let detail_export = post_route(route::BATCH_DETAIL_EXPORT)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(
            |request: BatchDetailExportRequest, dispatcher: Arc<Dispatcher>| async move {
                reply(dispatcher.create_batch_detail_export_file(&request).await)
            },
        );

    let batch_export = post_route(route::BATCH_EXPORT)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|request: BatchExportRequest, dispatcher: Arc<Dispatcher>| async move {
            reply(dispatcher.create_batch_export_files(&request).await)
        });

    let folder_access = post_route(route::FOLDER_ACCESS)
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|request: FolderAccessRequest, dispatcher: Arc<Dispatcher>| async move {
            reply(
                dispatcher
                    .can_processor_access_folder(&request.server_key, &request.folder_path)
                    .await,
            )
        });

    let health = get_route(routes::HEALTH)
        .and(with_dispatcher(dispatcher))
        .and_then(|dispatcher: Arc<Dispatcher>| async move {
            let processors = dispatcher.get_processors();
            let markets: usize = processors.iter().map(|p| p.markets.len()).sum();
            Ok::<_, Infallible>(warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "processors": processors.len(),
                "assigned_markets": markets,
            })))
        });

    register
        .or(unregister)
        .or(processors)
        .or(unassigned)
        .or(processor)
        .or(processor_markets)
        .or(assign)
        .or(taxonomy)
        .or(detail_export)
        .or(batch_export)
        .or(folder_access)
        .or(health)
}

fn reply<T: Serialize>(result: CoordinatorResult<T>) -> Result<warp::reply::Json, Infallible> {
    Ok(warp::reply::json(&RemoteReply::from_result(result)))
}

/// Serve the dispatcher contract until `shutdown` resolves
pub async fn serve(
    dispatcher: Arc<Dispatcher>,
    address: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> CoordinatorResult<()> {
    let (bound, server) = warp::serve(routes(dispatcher))
        .try_bind_with_graceful_shutdown(address, shutdown)
        .map_err(|e| CoordinatorError::internal_error(format!("cannot bind {address}: {e}")))?;
    tracing::info!(%bound, "Dispatcher HTTP surface listening");
    server.await;
    Ok(())
}
