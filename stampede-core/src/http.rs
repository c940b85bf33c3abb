use std::ops::Deref;
use std::time::Duration;

use stampede_http::{ClientOptions, HttpClient, HttpRequest, HttpResponse};
use tokio::time::Instant;

use crate::builtin::BuiltinMetrics;

/// A response together with the time it took to arrive.
#[derive(Debug, Clone)]
pub struct Response {
    inner: HttpResponse,
    duration: Duration,
}

impl Response {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn into_inner(self) -> HttpResponse {
        self.inner
    }
}

impl Deref for Response {
    type Target = HttpResponse;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// HTTP client that records the `http_req_*` and `data_*` series for every call.
#[derive(Debug, Clone)]
pub struct Http {
    client: HttpClient,
    metrics: BuiltinMetrics,
}

impl Http {
    pub(crate) fn new(request_timeout: Option<Duration>, metrics: BuiltinMetrics) -> Self {
        let client = HttpClient::new(ClientOptions {
            request_timeout,
            ..ClientOptions::default()
        });
        Self { client, metrics }
    }

    /// Transport errors and timeouts come back as `Err` and count as failed requests.
    /// A 4xx or 5xx status is still `Ok`, but is recorded in `http_req_failed`.
    pub async fn request(&self, req: HttpRequest) -> stampede_http::Result<Response> {
        let started = Instant::now();
        match self.client.request(req).await {
            Ok(inner) => {
                let duration = started.elapsed();
                let failed = !(200..400).contains(&inner.status);
                self.metrics.request(
                    Some(duration),
                    failed,
                    inner.bytes_sent,
                    inner.bytes_received,
                );
                Ok(Response { inner, duration })
            }
            Err(err) => {
                tracing::debug!(error = %err, kind = %err.kind(), "http request failed");
                self.metrics.request(None, true, 0, 0);
                Err(err)
            }
        }
    }

    pub async fn get(&self, url: &str) -> stampede_http::Result<Response> {
        self.request(HttpRequest::get(url)).await
    }
}
