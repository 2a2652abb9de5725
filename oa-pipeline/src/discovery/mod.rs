pub(crate) mod pod_monitor;
pub(crate) mod service_monitor;
pub(crate) mod static_endpoints;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use oa_core::config::{
    ConfigStore,
    EndpointConfig,
    MonitorKind,
    NamespaceSelectorConfig,
    ParamValue,
    TargetConfig,
};
use oa_core::errors::*;
use oa_core::k8s::ClusterCache;
use oa_core::prelude::*;
use tokio::sync::watch;
use tracing::*;

use crate::target::{
    Target,
    TargetRegistry,
};

err_impl! {DiscoveryError,
    #[error("endpoint port {0:?} is neither a known port name nor a number")]
    UnresolvablePort(String),
}

// Reconciles the config store against the cluster cache into the live target
// registry.  Each tick re-resolves every enabled monitor config from scratch;
// targets that stop matching get swept to Removed.
pub struct ServiceDiscovery {
    config_store: Arc<ConfigStore>,
    cache: Option<Arc<ClusterCache>>,
    registry: Arc<TargetRegistry>,
}

impl ServiceDiscovery {
    pub fn new(
        config_store: Arc<ConfigStore>,
        cache: Option<Arc<ClusterCache>>,
        registry: Arc<TargetRegistry>,
    ) -> ServiceDiscovery {
        ServiceDiscovery { config_store, cache, registry }
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> EmptyResult {
        let mut ticker = tokio::time::interval(Duration::from_secs(DISCOVERY_TICK_SECONDS));
        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = ticker.tick() => self.reconcile(),
                _ = shutdown_rx.changed() => break,
            }
        }
        Ok(())
    }

    pub fn reconcile(&self) {
        if let Some(cache) = &self.cache
            && !cache.is_initialized()
        {
            debug!("cluster cache not synced yet, skipping discovery tick");
            return;
        }

        if !self.config_store.is_enabled() {
            return;
        }

        let mut seen = HashSet::new();
        for config in self.config_store.scrape_configs() {
            if !config.enabled {
                continue;
            }

            let targets = match self.resolve(&config) {
                Ok(targets) => targets,
                Err(err) => {
                    warn!("could not resolve targets for {}: {err}", config.target_name);
                    continue;
                },
            };

            for target in targets {
                seen.insert(target.id.clone());
                self.registry.upsert(target);
            }
        }
        self.registry.sweep_unseen(&seen);
    }

    fn resolve(&self, config: &TargetConfig) -> anyhow::Result<Vec<Target>> {
        match config.kind {
            MonitorKind::StaticEndpoints => Ok(static_endpoints::resolve(config)),
            MonitorKind::PodMonitor => match &self.cache {
                Some(cache) => pod_monitor::resolve(config, cache),
                None => Ok(vec![]),
            },
            MonitorKind::ServiceMonitor => match &self.cache {
                Some(cache) => service_monitor::resolve(config, cache),
                None => Ok(vec![]),
            },
        }
    }
}

// Namespace resolution: explicit matchNames win, then label terms, then the
// default namespace.
pub(crate) fn resolve_namespaces(cache: &ClusterCache, sel: &NamespaceSelectorConfig) -> anyhow::Result<Vec<String>> {
    if !sel.match_names.is_empty() {
        return Ok(sel.match_names.clone());
    }
    if sel.has_label_terms() {
        let namespaces = cache.get_namespaces_by_labels(&sel.to_label_selector())?;
        return Ok(namespaces.iter().map(|ns| ns.name_any()).collect());
    }
    Ok(vec![DEFAULT_NAMESPACE.to_string()])
}

// Scheme inference: explicit wins, then an "https" port name, then a
// non-empty TLS config; plain http otherwise.
pub(crate) fn infer_scheme(endpoint: &EndpointConfig, port_name: Option<&str>) -> String {
    if !endpoint.scheme.is_empty() {
        return endpoint.scheme.clone();
    }
    if port_name.is_some_and(|name| name.eq_ignore_ascii_case("https")) {
        return "https".into();
    }
    if endpoint.tls_config.as_ref().is_some_and(|tls| !tls.is_empty()) {
        return "https".into();
    }
    "http".into()
}

pub(crate) fn endpoint_path(endpoint: &EndpointConfig) -> String {
    if endpoint.path.is_empty() {
        DEFAULT_METRICS_PATH.into()
    } else if endpoint.path.starts_with('/') {
        endpoint.path.clone()
    } else {
        format!("/{}", endpoint.path)
    }
}

pub(crate) fn build_url(scheme: &str, authority: &str, path: &str, endpoint: &EndpointConfig) -> anyhow::Result<String> {
    let mut url = url::Url::parse(&format!("{scheme}://{authority}{path}"))?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in &endpoint.params {
            match value {
                ParamValue::One(v) => {
                    query.append_pair(key, v);
                },
                ParamValue::Many(vs) => {
                    for v in vs {
                        query.append_pair(key, v);
                    }
                },
            }
        }
    }
    if endpoint.params.is_empty() {
        url.set_query(None);
    }
    Ok(url.to_string())
}

// Distinct paths on the same port have to produce distinct target ids, so
// the id carries a sanitized path suffix.
pub(crate) fn target_id(target_name: &str, ns: &str, workload: &str, port: &str, path: &str) -> String {
    let sanitized_path = path.trim_matches('/').replace('/', "_");
    format!("{target_name}@{ns}/{workload}:{port}/{sanitized_path}")
}

#[cfg(test)]
mod tests {
    use oa_testutils::*;

    use super::*;

    #[rstest]
    #[case::explicit_wins("http", Some("https"), None, "http")]
    #[case::https_port_name("", Some("HTTPS"), None, "https")]
    #[case::tls_config("", Some("web"), Some(true), "https")]
    #[case::plain("", Some("web"), None, "http")]
    fn test_infer_scheme(
        #[case] explicit: &str,
        #[case] port_name: Option<&str>,
        #[case] insecure_tls: Option<bool>,
        #[case] expected: &str,
    ) {
        let endpoint = EndpointConfig {
            scheme: explicit.into(),
            tls_config: insecure_tls.map(|insecure_skip_verify| oa_core::config::TlsConfig {
                insecure_skip_verify,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(infer_scheme(&endpoint, port_name), expected);
    }

    #[rstest]
    fn test_build_url_with_params() {
        let endpoint: EndpointConfig = serde_yaml::from_str(
            "
params:
  collect: [cpu, meminfo]
  format: text
",
        )
        .unwrap();
        let url = build_url("http", "10.1.2.3:9100", "/metrics", &endpoint).unwrap();
        assert_eq!(url, "http://10.1.2.3:9100/metrics?collect=cpu&collect=meminfo&format=text");
    }

    #[rstest]
    fn test_build_url_plain() {
        let url = build_url("https", "10.1.2.3:8443", "/metrics", &Default::default()).unwrap();
        assert_eq!(url, "https://10.1.2.3:8443/metrics");
    }

    #[rstest]
    fn test_target_id_distinguishes_paths() {
        let a = target_id("t", "ns", "pod-1", "9100", "/metrics");
        let b = target_id("t", "ns", "pod-1", "9100", "/probe/stats");
        assert_ne!(a, b);
        assert_eq!(b, "t@ns/pod-1:9100/probe_stats");
    }
}
