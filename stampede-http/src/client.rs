use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::{Error, HttpRequest, HttpResponse, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// TCP connect timeout. The OS default can be tens of seconds.
    pub connect_timeout: Option<Duration>,
    /// Applied to requests that do not carry their own timeout.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(3)),
            request_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Pooled HTTP/1.1 client, cheap to clone and share between workers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Option<Duration>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(opts: ClientOptions) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(opts.connect_timeout);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self {
            inner,
            request_timeout: opts.request_timeout,
        }
    }

    /// Sends `req` and reads the full response body.
    ///
    /// Non-2xx statuses are returned as responses; only transport problems are errors.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let timeout = req.timeout.or(self.request_timeout);
        match timeout {
            Some(t) => match tokio::time::timeout(t, self.send(req)).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(t)),
            },
            None => self.send(req).await,
        }
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }

    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let parsed = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::UnsupportedScheme(req.url));
        }
        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut bytes_sent = req.body.len() as u64;
        let mut builder = Request::builder().method(req.method).uri(uri);
        for (k, v) in &req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())
                .map_err(|_| Error::Header(k.clone()))?;
            let value =
                http::header::HeaderValue::from_str(v).map_err(|_| Error::Header(k.clone()))?;
            bytes_sent += header_len(name.as_str(), value.as_bytes());
            builder = builder.header(name, value);
        }

        let req: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;
        let res: hyper::Response<Incoming> = self.inner.request(req).await?;

        let (parts, body) = res.into_parts();
        let mut bytes_received = 0u64;
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in parts.headers.iter() {
            bytes_received += header_len(name.as_str(), value.as_bytes());
            let v = String::from_utf8_lossy(value.as_bytes()).into_owned();
            merged
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|cur| {
                    cur.push_str(", ");
                    cur.push_str(&v);
                })
                .or_insert(v);
        }

        let body = body.collect().await?.to_bytes();
        bytes_received += body.len() as u64;

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            body,
            headers: merged.into_iter().collect(),
            bytes_sent,
            bytes_received,
        })
    }
}

// "name: value\r\n"
fn header_len(name: &str, value: &[u8]) -> u64 {
    (name.len() + value.len() + 4) as u64
}
