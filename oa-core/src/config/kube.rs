use std::sync::Arc;

use tracing::*;

use super::model::ScrapeConfig;
use super::ConfigStore;
use crate::constants::*;
use crate::k8s::ClusterCache;
use crate::prelude::*;

// ConfigMap-backed configuration: the scrape config YAML lives under the
// `scrape_config.yaml` data key of a well-known ConfigMap.  The cache handler
// only fires on real data change, so every invocation here is a reload.
pub fn attach_to_config_map(
    store: Arc<ConfigStore>,
    cache: &ClusterCache,
    ns: &str,
    name: &str,
) -> anyhow::Result<()> {
    if let Some(cm) = cache.get_config_map(ns, name) {
        if let Some(next) = parse_config_map(&cm) {
            store.replace(next.features.open_agent);
        }
    }

    let (watch_ns, watch_name) = (ns.to_string(), name.to_string());
    cache.register_config_map_handler(move |cm| {
        if cm.namespace().as_deref() != Some(watch_ns.as_str()) || cm.name_any() != watch_name {
            return;
        }
        match parse_config_map(cm) {
            Some(next) => {
                info!("scrape config changed in configmap {watch_ns}/{watch_name}, reloading");
                store.replace(next.features.open_agent);
            },
            None => warn!("configmap {watch_ns}/{watch_name} has no usable scrape config, keeping last good"),
        }
    });
    Ok(())
}

fn parse_config_map(cm: &corev1::ConfigMap) -> Option<ScrapeConfig> {
    let raw = cm.data.as_ref()?.get(SCRAPE_CONFIG_FILE)?;
    match serde_yaml::from_str(raw) {
        Ok(config) => Some(config),
        Err(err) => {
            warn!("could not parse scrape config from configmap: {err}");
            None
        },
    }
}
