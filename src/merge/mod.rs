//! Proxy list merging
//!
//! Deduplicates proxies by their (type, server, port) identity,
//! disambiguates display names, and injects the result into a YAML
//! template. Dedup policy: the last value written for a key wins, but
//! the entry keeps the position where its key was first seen.

use crate::config::ProxyDef;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Reserved template key holding the proxy list
const PROXIES_KEY: &str = "proxies";

/// Deduplicate by (type, server, port): last value wins, first-seen
/// position is kept.
pub fn dedup_proxies(proxies: Vec<ProxyDef>) -> Vec<ProxyDef> {
    let mut slots: HashMap<(String, String, u16), usize> = HashMap::new();
    let mut deduped: Vec<ProxyDef> = Vec::new();

    for proxy in proxies {
        match slots.get(&proxy.key()) {
            Some(&slot) => deduped[slot] = proxy,
            None => {
                slots.insert(proxy.key(), deduped.len());
                deduped.push(proxy);
            }
        }
    }

    deduped
}

/// Make every display name unique.
///
/// Walks the list in order; a repeated name gets the entry's index in
/// the deduplicated list appended, again if the suffixed name is
/// itself already taken.
pub fn disambiguate_names(proxies: &mut [ProxyDef]) {
    let mut seen: HashSet<String> = HashSet::new();

    for i in 0..proxies.len() {
        if !seen.insert(proxies[i].name.clone()) {
            let mut renamed = format!("{} {}", proxies[i].name, i);
            while !seen.insert(renamed.clone()) {
                renamed = format!("{} {}", renamed, i);
            }
            debug!("renaming duplicate '{}' -> '{}'", proxies[i].name, renamed);
            proxies[i].name = renamed;
        }
    }
}

/// Replace the template's `proxies` key with the given list and
/// serialize back to YAML text. Every other template key is passed
/// through untouched.
pub fn merge_into_template(template: &str, proxies: Vec<ProxyDef>) -> Result<String> {
    let mut proxies = dedup_proxies(proxies);
    disambiguate_names(&mut proxies);

    let mut doc: serde_yaml::Value = serde_yaml::from_str(template)?;
    let mapping = doc
        .as_mapping_mut()
        .ok_or_else(|| Error::parse("template root is not a YAML mapping"))?;

    mapping.insert(
        serde_yaml::Value::String(PROXIES_KEY.to_string()),
        serde_yaml::to_value(&proxies)?,
    );

    Ok(serde_yaml::to_string(&doc)?)
}
