//! Run configuration
//!
//! All inputs arrive through the environment (the tool runs in CI):
//! subscription sources as a JSON list, an optional bearer token, an
//! optional inline proxy-list document, and one or two inline YAML
//! templates. Everything is collected and validated once at startup.

use crate::subscription::SubscriptionSource;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Environment variable holding the JSON subscription list
pub const ENV_SUBSCRIPTIONS: &str = "SUBSCRIPTIONS";

/// Environment variable holding the optional bearer token
pub const ENV_TOKEN: &str = "MY_TOKEN";

/// Environment variable holding an optional inline proxy-list document
pub const ENV_PROXY_FILE: &str = "PROXY_FILE";

/// Environment variable holding the inline YAML template
pub const ENV_TEMPLATE: &str = "TEMPLATE";

/// Environment variable holding the optional restricted template
pub const ENV_TEMPLATE_RESTRICTED: &str = "TEMPLATE_RESTRICTED";

/// Environment variable overriding the output/work directory
pub const ENV_WORK_DIR: &str = "WORK_DIR";

/// One proxy definition from an upstream subscription.
///
/// Only the fields the pipeline touches are typed; every other
/// protocol-specific key is carried verbatim in `extra` and written
/// back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyDef {
    /// Display name (mutated by source annotation and renaming)
    pub name: String,

    /// Proxy type
    #[serde(rename = "type")]
    pub proxy_type: String,

    /// Server address
    pub server: String,

    /// Server port
    pub port: u16,

    /// All other fields
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

impl ProxyDef {
    /// Identity key used for deduplication
    pub fn key(&self) -> (String, String, u16) {
        (self.proxy_type.clone(), self.server.clone(), self.port)
    }
}

/// Raw subscription entry as it appears in the `SUBSCRIPTIONS` JSON
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Url(String),
    Named { name: String, url: String },
}

/// Validated run settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Remote subscription sources, in configured order
    pub sources: Vec<SubscriptionSource>,

    /// Optional token sent as `Authorization: token <..>`
    pub token: Option<String>,

    /// Optional inline proxy-list document, merged after all remote sources
    pub local_proxies: Option<String>,

    /// Base template the merged proxies are injected into
    pub template: String,

    /// Optional alternate template for the restricted artifact
    pub template_restricted: Option<String>,

    /// Directory for output artifacts, the cached core binary and the
    /// control socket
    pub work_dir: PathBuf,
}

impl Settings {
    /// Collect and validate settings from the environment.
    ///
    /// Missing `SUBSCRIPTIONS` or `TEMPLATE` is a run-level fatal error.
    pub fn from_env() -> Result<Self> {
        let subs = env::var(ENV_SUBSCRIPTIONS)
            .map_err(|_| Error::config(format!("{ENV_SUBSCRIPTIONS} is not set")))?;
        let template = env::var(ENV_TEMPLATE)
            .map_err(|_| Error::config(format!("{ENV_TEMPLATE} is not set")))?;

        Ok(Settings {
            sources: Self::parse_sources(&subs)?,
            token: env::var(ENV_TOKEN).ok(),
            local_proxies: env::var(ENV_PROXY_FILE).ok(),
            template,
            template_restricted: env::var(ENV_TEMPLATE_RESTRICTED).ok(),
            work_dir: env::var(ENV_WORK_DIR).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(".")),
        })
    }

    /// Parse the `SUBSCRIPTIONS` JSON list.
    ///
    /// Entries are either plain URL strings or `{"name": .., "url": ..}`
    /// objects.
    pub fn parse_sources(json: &str) -> Result<Vec<SubscriptionSource>> {
        let raw: Vec<RawSource> = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("{ENV_SUBSCRIPTIONS} is not a valid JSON list: {e}")))?;

        Ok(raw
            .into_iter()
            .map(|s| match s {
                RawSource::Url(url) => SubscriptionSource::remote(None, url),
                RawSource::Named { name, url } => SubscriptionSource::remote(Some(name), url),
            })
            .collect())
    }

    /// Path of the merged configuration artifact
    pub fn output_path(&self) -> PathBuf {
        self.work_dir.join("config.yaml")
    }

    /// Path of the restricted-variant artifact
    pub fn restricted_output_path(&self) -> PathBuf {
        self.work_dir.join("restricted.yaml")
    }
}
