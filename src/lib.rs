//! submerge - subscription merge and speed-test pipeline for mihomo
//!
//! Aggregates proxy definitions from remote subscription endpoints and
//! an optional local document, deduplicates and renames them, injects
//! them into a YAML template, and optionally drives a locally spawned
//! mihomo core to filter proxies by measured delay.
//!
//! # Architecture
//!
//! ```text
//! subscription/ --> merge/ --> config.yaml / restricted.yaml
//!                                  |
//!                                  v (speedtest)
//!                    mihomo/ (process + control client)
//!                                  |
//!                                  v
//!                    speed/ --> top50.yaml / top100.yaml
//! ```

pub mod common;
pub mod config;
pub mod merge;
pub mod mihomo;
pub mod speed;
pub mod subscription;

pub use common::error::{Error, Result};
pub use config::Settings;

use subscription::Fetcher;
use tracing::{info, warn};

/// Fetch all configured sources, merge them into the template(s), and
/// write the configuration artifacts.
pub async fn generate(settings: &Settings) -> Result<()> {
    let fetcher = Fetcher::new(settings.token.clone())?;
    let proxies = fetcher
        .collect(&settings.sources, settings.local_proxies.as_deref())
        .await;

    if proxies.is_empty() {
        warn!("no proxies collected from any source");
    }
    info!("collected {} proxies from {} sources", proxies.len(), settings.sources.len());

    tokio::fs::create_dir_all(&settings.work_dir).await?;

    let merged = merge::merge_into_template(&settings.template, proxies.clone())?;
    tokio::fs::write(settings.output_path(), merged).await?;
    info!("wrote {}", settings.output_path().display());

    if let Some(template) = &settings.template_restricted {
        let merged = merge::merge_into_template(template, proxies)?;
        tokio::fs::write(settings.restricted_output_path(), merged).await?;
        info!("wrote {}", settings.restricted_output_path().display());
    }

    Ok(())
}
