//! Liveness filter
//!
//! Starts the core against a merged configuration, measures every
//! proxy's delay through the control socket, drops the unreachable
//! ones, and emits latency-sorted truncations of the document.

use crate::config::ProxyDef;
use crate::merge;
use crate::mihomo::{ControlClient, MihomoCore};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fallback configuration URL when the CLI argument is absent
pub const DEFAULT_CONFIG_URL: &str =
    "https://raw.githubusercontent.com/tsang/submerge-configs/main/config.yaml";

/// Config file name handed to the spawned core
const SPEEDTEST_CONFIG: &str = "speedtest.yaml";

/// Truncated result documents, smallest first
const OUTPUTS: &[(usize, &str)] = &[(50, "top50.yaml"), (100, "top100.yaml")];

/// Timeout for fetching the configuration document itself
const CONFIG_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One speed-test run over a merged configuration
pub struct SpeedTest {
    work_dir: PathBuf,
    http: reqwest::Client,
}

impl SpeedTest {
    pub fn new<P: Into<PathBuf>>(work_dir: P) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CONFIG_FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(SpeedTest { work_dir: work_dir.into(), http })
    }

    /// Fetch the configuration, probe every proxy through a locally
    /// spawned core, and write the top-N artifacts.
    ///
    /// Per-proxy failures are dropped with a warning; a core that never
    /// starts is fatal. The core is stopped on every path out of the
    /// probe phase.
    pub async fn run(&self, config_url: &str) -> Result<()> {
        info!("fetching configuration from {config_url}");
        let config_text = self.fetch_config(config_url).await?;
        let proxies = parse_proxies(&config_text)?;
        info!("configuration lists {} proxies", proxies.len());

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let config_path = self.work_dir.join(SPEEDTEST_CONFIG);
        tokio::fs::write(&config_path, &config_text).await?;

        let mut core = MihomoCore::new(&self.work_dir);
        core.ensure_binary(&self.http).await?;
        core.start(&config_path).await?;

        // Force-apply the exact document we wrote; the core keeps its
        // boot config on failure, which the probes will surface anyway.
        if !core.client().put_config(&config_path).await {
            warn!("force-apply of {} was not accepted", config_path.display());
        }

        let survivors = probe_all(core.client(), proxies).await;
        core.stop().await;

        info!("{} proxies survived the delay probe", survivors.len());
        for (count, file_name) in OUTPUTS {
            let subset: Vec<ProxyDef> = survivors.iter().take(*count).cloned().collect();
            let document = merge::merge_into_template(&config_text, subset)?;
            let path = self.work_dir.join(file_name);
            tokio::fs::write(&path, document).await?;
            info!("wrote {}", path.display());
        }

        Ok(())
    }

    async fn fetch_config(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await.map_err(|e| Error::network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::network(format!(
                "configuration download failed: status {}",
                response.status()
            )));
        }
        response.text().await.map_err(|e| Error::network(e.to_string()))
    }
}

/// Pull the `proxies` list out of a merged configuration document
fn parse_proxies(config_text: &str) -> Result<Vec<ProxyDef>> {
    let doc: serde_yaml::Value = serde_yaml::from_str(config_text)?;
    match doc.get("proxies") {
        Some(list) if !list.is_null() => Ok(serde_yaml::from_value(list.clone())?),
        _ => Ok(Vec::new()),
    }
}

/// Probe every proxy in document order, sequentially.
///
/// A probe that errors, times out, or answers without a delay is one
/// and the same failure: the proxy is dropped with a warning.
async fn probe_all(client: &ControlClient, proxies: Vec<ProxyDef>) -> Vec<ProxyDef> {
    let mut alive = Vec::new();

    for proxy in proxies {
        match client.proxy_delay(&proxy.name).await {
            Some(delay) => {
                debug!("{}: {}ms", proxy.name, delay);
                alive.push((delay, proxy));
            }
            None => warn!("dropping {}: delay probe failed", proxy.name),
        }
    }

    rank_survivors(alive)
}

/// Sort ascending by measured delay and record it on each proxy
fn rank_survivors(mut alive: Vec<(u64, ProxyDef)>) -> Vec<ProxyDef> {
    alive.sort_by_key(|(delay, _)| *delay);
    alive
        .into_iter()
        .map(|(delay, mut proxy)| {
            proxy.extra.insert("delay".to_string(), serde_yaml::Value::from(delay));
            proxy
        })
        .collect()
}
