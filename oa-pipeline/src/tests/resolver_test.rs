use std::sync::Arc;

use oa_core::config::{
    ConfigStore,
    ScrapeConfig,
    TargetConfig,
};
use oa_core::prelude::*;

use super::*;
use crate::discovery::{
    pod_monitor,
    service_monitor,
    ServiceDiscovery,
};
use crate::target::{
    TargetRegistry,
    TargetState,
};

fn pod_monitor_config() -> TargetConfig {
    serde_yaml::from_str(&format!(
        "
targetName: {TEST_TARGET_NAME}
type: PodMonitor
namespaceSelector:
  matchNames: [{TEST_NAMESPACE}]
selector:
  matchLabels:
    app: payments
endpoints:
  - port: metrics
    path: /metrics
    interval: 15s
"
    ))
    .unwrap()
}

fn service_monitor_config() -> TargetConfig {
    serde_yaml::from_str(&format!(
        "
targetName: {TEST_TARGET_NAME}
type: ServiceMonitor
namespaceSelector:
  matchNames: [{TEST_NAMESPACE}]
selector:
  matchLabels:
    app: payments
endpoints:
  - port: metrics
    path: /metrics
"
    ))
    .unwrap()
}

#[rstest(tokio::test)]
async fn test_pod_monitor_resolution_through_cache(test_pod: corev1::Pod) {
    let mut second_pod = test_pod.clone();
    second_pod.metadata.name = Some("the-pod-2".into());
    set_pod_unready(&mut second_pod);

    let cache = FakeClusterCache {
        pods: vec![test_pod, second_pod],
        ..Default::default()
    }
    .build();

    let targets = pod_monitor::resolve(&pod_monitor_config(), &cache).unwrap();
    assert_eq!(targets.len(), 2);

    let ready: Vec<_> = targets.iter().filter(|t| t.state == TargetState::Ready).collect();
    let pending: Vec<_> = targets.iter().filter(|t| t.state == TargetState::Pending).collect();
    assert_eq!(ready.len(), 1);
    assert_eq!(pending.len(), 1);
    assert_eq!(ready[0].labels["pod"], TEST_POD);
    assert_eq!(ready[0].url, format!("http://{TEST_POD_IP}:9100/metrics"));
}

#[rstest(tokio::test)]
async fn test_pod_monitor_selector_excludes_unlabeled(mut test_pod: corev1::Pod) {
    test_pod.metadata.labels = oa_core::klabel!("app" => "billing");
    let cache = FakeClusterCache { pods: vec![test_pod], ..Default::default() }.build();

    let targets = pod_monitor::resolve(&pod_monitor_config(), &cache).unwrap();
    assert!(targets.is_empty());
}

#[rstest(tokio::test)]
async fn test_namespace_selection_by_labels(test_pod: corev1::Pod, test_namespace: corev1::Namespace) {
    let mut config = pod_monitor_config();
    config.namespace_selector = serde_yaml::from_str(
        "
matchLabels:
  team: payments
",
    )
    .unwrap();

    let cache = FakeClusterCache {
        pods: vec![test_pod],
        namespaces: vec![test_namespace],
        ..Default::default()
    }
    .build();

    let targets = pod_monitor::resolve(&config, &cache).unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].labels["namespace"], TEST_NAMESPACE);
}

#[rstest(tokio::test)]
async fn test_service_monitor_resolution_through_cache(
    test_service: corev1::Service,
    test_endpoint_slice: discoveryv1::EndpointSlice,
) {
    let cache = FakeClusterCache {
        services: vec![test_service],
        endpoint_slices: vec![test_endpoint_slice],
        ..Default::default()
    }
    .build();

    let targets = service_monitor::resolve(&service_monitor_config(), &cache).unwrap();
    assert_eq!(targets.len(), 2);

    let ready: Vec<_> = targets.iter().filter(|t| t.state == TargetState::Ready).collect();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].url, "http://10.1.2.3:9100/metrics");
    assert_eq!(ready[0].labels["service"], TEST_SERVICE);

    let pending: Vec<_> = targets.iter().filter(|t| t.state == TargetState::Pending).collect();
    assert_eq!(pending[0].url, "http://10.1.2.4:9100/metrics");
}

#[rstest(tokio::test)]
async fn test_service_monitor_no_endpoints_yields_nothing(test_service: corev1::Service) {
    let cache = FakeClusterCache { services: vec![test_service], ..Default::default() }.build();
    let targets = service_monitor::resolve(&service_monitor_config(), &cache).unwrap();
    assert!(targets.is_empty());
}

fn store_with_targets(targets_yaml: &str) -> Arc<ConfigStore> {
    let config: ScrapeConfig = serde_yaml::from_str(&format!(
        "
features:
  openAgent:
    enabled: true
    targets:
{targets_yaml}
"
    ))
    .unwrap();
    Arc::new(ConfigStore::new(config.features.open_agent))
}

#[rstest(tokio::test)]
async fn test_reconcile_drops_disabled_configs(test_pod: corev1::Pod) {
    let store = store_with_targets(&format!(
        "
      - targetName: enabled-monitor
        type: PodMonitor
        namespaceSelector:
          matchNames: [{TEST_NAMESPACE}]
        selector:
          matchLabels:
            app: payments
        endpoints:
          - port: metrics
      - targetName: disabled-monitor
        type: PodMonitor
        enabled: false
        namespaceSelector:
          matchNames: [{TEST_NAMESPACE}]
        selector:
          matchLabels:
            app: payments
        endpoints:
          - port: metrics
"
    ));

    let cache = FakeClusterCache { pods: vec![test_pod], ..Default::default() }.build();
    let registry = Arc::new(TargetRegistry::new());
    ServiceDiscovery::new(store, Some(cache), registry.clone()).reconcile();

    let ready = registry.ready_targets();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].labels["job"], "enabled-monitor");
}

// An unsynced cache means the whole tick is skipped, leaving the registry
// untouched rather than half-updated
#[rstest(tokio::test)]
async fn test_reconcile_skips_when_cache_not_synced(test_pod: corev1::Pod) {
    let store = store_with_targets(&format!(
        "
      - targetName: {TEST_TARGET_NAME}
        type: PodMonitor
        namespaceSelector:
          matchNames: [{TEST_NAMESPACE}]
        selector:
          matchLabels:
            app: payments
        endpoints:
          - port: metrics
"
    ));

    let cache = FakeClusterCache {
        pods: vec![test_pod],
        not_synced: true,
        ..Default::default()
    }
    .build();
    let registry = Arc::new(TargetRegistry::new());
    let discovery = ServiceDiscovery::new(store, Some(cache), registry.clone());

    discovery.reconcile();
    assert!(registry.is_empty());
}

#[rstest(tokio::test)]
async fn test_reconcile_sweeps_vanished_targets(test_pod: corev1::Pod) {
    let store = store_with_targets(&format!(
        "
      - targetName: {TEST_TARGET_NAME}
        type: PodMonitor
        namespaceSelector:
          matchNames: [{TEST_NAMESPACE}]
        selector:
          matchLabels:
            app: payments
        endpoints:
          - port: metrics
"
    ));

    let cache = FakeClusterCache { pods: vec![test_pod], ..Default::default() }.build();
    let registry = Arc::new(TargetRegistry::new());
    let discovery = ServiceDiscovery::new(store.clone(), Some(cache), registry.clone());
    discovery.reconcile();
    assert_eq!(registry.ready_targets().len(), 1);

    // the pod goes away; the next tick moves the target to Removed
    let empty_cache = FakeClusterCache::default().build();
    let discovery = ServiceDiscovery::new(store, Some(empty_cache), registry.clone());
    discovery.reconcile();
    assert!(registry.ready_targets().is_empty());
    assert_eq!(registry.len(), 1);
}
