//! HTTP surface of a processor
//!
//! Every operation of the processor contract is `POST /<route>` with a JSON
//! body and always answers 200 with a [`RemoteReply`]; failures travel in the
//! reply rather than as transport errors. `GET /health` reports the worker
//! status and metrics.

use super::worker::ProcessorWorker;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::messages::{
    BatchDetailExportRequest, BatchExportRequest, FolderPathRequest, MarketRequest, RemoteReply,
    TaxonomyPathRequest,
};
use crate::protocol::routes::{self, processor as route};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use warp::Filter;

fn with_worker(
    worker: Arc<ProcessorWorker>,
) -> impl Filter<Extract = (Arc<ProcessorWorker>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&worker))
}

/// Route table for the processor contract
pub fn routes(
    worker: Arc<ProcessorWorker>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let assign = warp::path(route::ASSIGN_MARKET)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_worker(worker.clone()))
        .and_then(|request: MarketRequest, worker: Arc<ProcessorWorker>| async move {
            reply(worker.assign_market_to_processor(request.market_id).await)
        });

    let release = warp::path(route::RELEASE_MARKET)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_worker(worker.clone()))
        .and_then(|request: MarketRequest, worker: Arc<ProcessorWorker>| async move {
            reply(Ok(worker.release_market(request.market_id).await))
        });

    let taxonomy = warp::path(route::LOAD_TAXONOMY)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_worker(worker.clone()))
        .and_then(|request: TaxonomyPathRequest, worker: Arc<ProcessorWorker>| async move {
            let path = PathBuf::from(request.taxonomy_path);
            reply(worker.load_market_base_taxonomy(&path).await)
        });

    let folder_access = warp::path(route::FOLDER_ACCESS)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_worker(worker.clone()))
        .and_then(|request: FolderPathRequest, worker: Arc<ProcessorWorker>| async move {
            let path = PathBuf::from(request.folder_path);
            reply(worker.can_access_folder(&path).await)
        });

    let detail_export = warp::path(route::BATCH_DETAIL_EXPORT)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_worker(worker.clone()))
        .and_then(
            |request: BatchDetailExportRequest, worker: Arc<ProcessorWorker>| async move {
                reply(
                    worker
                        .create_batch_detail_export_file(&request)
                        .await
                        .map(|path| path.display().to_string()),
                )
            },
        );

    let batch_export = warp::path(route::BATCH_EXPORT)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_worker(worker.clone()))
        .and_then(|request: BatchExportRequest, worker: Arc<ProcessorWorker>| async move {
            reply(worker.create_batch_export_files(&request).await.map(|paths| {
                paths
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
            }))
        });

    let health = warp::path(routes::HEALTH)
        .and(warp::path::end())
        .and(warp::get())
        .and(with_worker(worker))
        .and_then(|worker: Arc<ProcessorWorker>| async move {
            Ok::<_, Infallible>(warp::reply::json(&worker.status().await))
        });

    assign
        .or(release)
        .or(taxonomy)
        .or(folder_access)
        .or(detail_export)
        .or(batch_export)
        .or(health)
}

fn reply<T: serde::Serialize>(result: CoordinatorResult<T>) -> Result<warp::reply::Json, Infallible> {
    Ok(warp::reply::json(&RemoteReply::from_result(result)))
}

/// Serve the processor contract until `shutdown` resolves
pub async fn serve(
    worker: Arc<ProcessorWorker>,
    address: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> CoordinatorResult<()> {
    let (bound, server) = warp::serve(routes(worker.clone()))
        .try_bind_with_graceful_shutdown(address, shutdown)
        .map_err(|e| CoordinatorError::internal_error(format!("cannot bind {address}: {e}")))?;
    tracing::info!(server_key = worker.server_key(), %bound, "Processor HTTP surface listening");
    server.await;
    Ok(())
}
