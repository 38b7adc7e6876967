//! JSON-over-HTTP calls with timeout and retry
//!
//! Used by the dispatcher to reach processors and by processors and operators
//! to reach the dispatcher. Server errors (5xx) and network errors are retried
//! with exponential backoff; timeouts and client errors are not. Only
//! transport failures come back retryable: a failure the remote side reported
//! in its reply stays definite.

use super::messages::RemoteReply;
use crate::error::{CoordinatorError, CoordinatorResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP caller for remote operations answering with a [`RemoteReply`]
#[derive(Debug, Clone)]
pub struct RemoteCaller {
    client: reqwest::Client,
    timeout: Duration,
    retry_attempts: usize,
}

impl RemoteCaller {
    pub fn new(timeout: Duration, retry_attempts: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            retry_attempts,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `POST` a JSON request and unwrap the reply
    pub async fn post<Req, T>(&self, url: &str, request: &Req) -> CoordinatorResult<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(url, |client| client.post(url).json(request)).await
    }

    /// `GET` a route and unwrap the reply
    pub async fn get<T>(&self, url: &str) -> CoordinatorResult<T>
    where
        T: DeserializeOwned,
    {
        self.call(url, |client| client.get(url)).await
    }

    async fn call<T, F>(&self, url: &str, build: F) -> CoordinatorResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..=self.retry_attempts {
            debug!(
                attempt = attempt + 1,
                max_attempts = self.retry_attempts + 1,
                url = %url,
                "Calling remote operation"
            );

            match build(&self.client).timeout(self.timeout).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let reply: RemoteReply<T> = response.json().await.map_err(|e| {
                            CoordinatorError::remote_failed(format!(
                                "invalid reply from {url}: {e}"
                            ))
                        })?;
                        return reply.into_result();
                    } else if status.is_server_error() && attempt < self.retry_attempts {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            url = %url,
                            "Remote returned server error, retrying"
                        );
                        backoff(attempt).await;
                        last_error = Some(format!("server error: {status}"));
                        continue;
                    } else if status.is_server_error() {
                        return Err(CoordinatorError::remote(format!(
                            "{url} answered with status {status}"
                        )));
                    } else {
                        return Err(CoordinatorError::remote_failed(format!(
                            "{url} answered with status {status}"
                        )));
                    }
                }
                Err(e) if e.is_timeout() => {
                    return Err(CoordinatorError::Retryable {
                        message: format!("{url} timed out after {:?}", self.timeout),
                    });
                }
                Err(e) if attempt < self.retry_attempts => {
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        url = %url,
                        "Network error, retrying"
                    );
                    backoff(attempt).await;
                    last_error = Some(format!("network error: {e}"));
                    continue;
                }
                Err(e) => {
                    return Err(CoordinatorError::remote(format!("{url} unreachable: {e}")));
                }
            }
        }

        Err(CoordinatorError::remote(format!(
            "{url} failed after {} retries: {}",
            self.retry_attempts,
            last_error.unwrap_or_else(|| "unknown error".to_string())
        )))
    }
}

async fn backoff(attempt: usize) {
    let backoff_ms = 100 * 2_u64.pow(attempt as u32);
    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
}
