//! Subscription fetching
//!
//! Each source is a remote document (or one inline local document)
//! holding a `proxies` list. A failing source contributes zero proxies
//! and never aborts the run; other sources still count.

use crate::config::ProxyDef;
use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// User agent expected by subscription panels
const USER_AGENT: &str = "clash.meta";

/// Per-request timeout for subscription downloads
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Label used for the inline local proxy-list document
pub const LOCAL_FILE_LABEL: &str = "file";

/// Where a proxy list comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionSource {
    /// Remote document fetched over HTTP
    Remote { name: Option<String>, url: String },
    /// Inline local document supplied through the environment
    LocalFile,
}

impl SubscriptionSource {
    pub fn remote(name: Option<String>, url: String) -> Self {
        SubscriptionSource::Remote { name, url }
    }

    /// Display label used to annotate proxy names.
    ///
    /// Explicit name, else the URL's hostname, else the raw URL.
    pub fn label(&self) -> String {
        match self {
            SubscriptionSource::Remote { name: Some(name), .. } => name.clone(),
            SubscriptionSource::Remote { name: None, url } => Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(String::from))
                .unwrap_or_else(|| url.clone()),
            SubscriptionSource::LocalFile => LOCAL_FILE_LABEL.to_string(),
        }
    }
}

/// Subscription document shape; only the `proxies` key matters
#[derive(Debug, Deserialize)]
struct SubscriptionDoc {
    #[serde(default)]
    proxies: Option<Vec<ProxyDef>>,
}

/// Fetches subscription documents and annotates their proxies
pub struct Fetcher {
    client: reqwest::Client,
    token: Option<String>,
}

impl Fetcher {
    pub fn new(token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(Fetcher { client, token })
    }

    /// Fetch every source in order, then the local document if present.
    ///
    /// Per-source failures are logged and skipped.
    pub async fn collect(
        &self,
        sources: &[SubscriptionSource],
        local_proxies: Option<&str>,
    ) -> Vec<ProxyDef> {
        let mut all = Vec::new();

        for source in sources {
            match self.fetch_document(source).await {
                Ok(text) => {
                    let proxies = parse_and_annotate(&text, &source.label());
                    debug!("{}: {} proxies", source.label(), proxies.len());
                    all.extend(proxies);
                }
                Err(e) => warn!("skipping subscription {}: {}", source.label(), e),
            }
        }

        if let Some(text) = local_proxies {
            all.extend(parse_and_annotate(text, &SubscriptionSource::LocalFile.label()));
        }

        all
    }

    /// Download one remote subscription document
    async fn fetch_document(&self, source: &SubscriptionSource) -> Result<String> {
        let url = match source {
            SubscriptionSource::Remote { url, .. } => url,
            SubscriptionSource::LocalFile => {
                return Err(Error::internal("local source has no URL"));
            }
        };

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }

        let response = request.send().await.map_err(|e| Error::network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::network(format!("status {}", response.status())));
        }

        response.text().await.map_err(|e| Error::network(e.to_string()))
    }
}

/// Parse one subscription document and suffix every proxy name with
/// its source label.
///
/// Malformed YAML and a missing `proxies` key both yield zero proxies.
pub fn parse_and_annotate(text: &str, label: &str) -> Vec<ProxyDef> {
    let doc: SubscriptionDoc = match serde_yaml::from_str(text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("malformed subscription document from [{label}]: {e}");
            return Vec::new();
        }
    };

    let mut proxies = doc.proxies.unwrap_or_default();
    for proxy in &mut proxies {
        proxy.name = format!("{} [{label}]", proxy.name);
    }
    proxies
}
