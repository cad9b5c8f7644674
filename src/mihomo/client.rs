//! Control client for the mihomo external controller API
//!
//! Speaks HTTP/1 over the core's Unix control socket, one fresh
//! connection per call. Every public call swallows transport and shape
//! errors and returns an absent result; callers treat "no result" and
//! "result missing the expected field" identically.

use crate::{Error, Result};
use bytes::Bytes;
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tracing::debug;

/// Fixed external URL the core probes through each proxy
pub const PROBE_URL: &str = "http://www.gstatic.com/generate_204";

/// Per-proxy probe timeout handed to the core, in milliseconds
pub const PROBE_TIMEOUT_MS: u64 = 5000;

/// Thin HTTP-over-socket client for one core instance
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new<P: Into<PathBuf>>(socket_path: P) -> Self {
        ControlClient { socket_path: socket_path.into() }
    }

    /// GET /version
    pub async fn version(&self) -> Option<String> {
        let body = self.call(Method::GET, "/version", None).await?;
        body.get("version").and_then(|v| v.as_str()).map(String::from)
    }

    /// GET /configs
    pub async fn get_config(&self) -> Option<Value> {
        self.call(Method::GET, "/configs", None).await
    }

    /// PUT /configs?force=true pointing the core at a config file
    pub async fn put_config(&self, config_path: &Path) -> bool {
        let body = json!({ "path": config_path.to_string_lossy(), "payload": "" });
        self.call(Method::PUT, "/configs?force=true", Some(body)).await.is_some()
    }

    /// GET /proxies
    pub async fn proxies(&self) -> Option<Value> {
        self.call(Method::GET, "/proxies", None).await
    }

    /// GET /proxies/{name}/delay against the fixed probe URL.
    ///
    /// Absent on transport failure, non-2xx status, core-side timeout,
    /// or a response without a `delay` field.
    pub async fn proxy_delay(&self, name: &str) -> Option<u64> {
        let route = delay_route(name);
        let body = self.call(Method::GET, &route, None).await?;
        body.get("delay").and_then(|v| v.as_u64())
    }

    /// One request, errors collapsed to `None` with a debug trace
    async fn call(&self, method: Method, route: &str, body: Option<Value>) -> Option<Value> {
        match self.request(method, route, body).await {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("control call {} failed: {}", route, e);
                None
            }
        }
    }

    async fn request(&self, method: Method, route: &str, body: Option<Value>) -> Result<Value> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| Error::network(format!("control socket: {e}")))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("control connection closed: {}", e);
            }
        });

        let payload = match body {
            Some(value) => Bytes::from(serde_json::to_vec(&value)?),
            None => Bytes::new(),
        };
        let request = Request::builder()
            .method(method)
            .uri(route)
            .header(http::header::HOST, "localhost")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(payload))
            .map_err(|e| Error::internal(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::network(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(Error::network(format!("control status {status}")));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Build the delay route for one proxy name
fn delay_route(name: &str) -> String {
    format!(
        "/proxies/{}/delay?url={}&timeout={}",
        urlencoding::encode(name),
        urlencoding::encode(PROBE_URL),
        PROBE_TIMEOUT_MS
    )
}
