use oa_core::config::{
    EndpointConfig,
    MonitorKind,
    RelabelAction,
    RelabelConfig,
    TargetConfig,
};
use oa_core::prelude::*;
use rstest::fixture;

pub const UP_METRICS_BODY: &str = "# HELP up target up\n# TYPE up gauge\nup{job=\"node\"} 1 1700000000000\n";

#[fixture]
pub fn test_endpoint_config(#[default("metrics".into())] port: String) -> EndpointConfig {
    EndpointConfig {
        port,
        path: "/metrics".into(),
        interval: "15s".into(),
        timeout: "5s".into(),
        ..Default::default()
    }
}

#[fixture]
pub fn test_target_config(
    #[default(MonitorKind::PodMonitor)] kind: MonitorKind,
    test_endpoint_config: EndpointConfig,
) -> TargetConfig {
    let mut config: TargetConfig = serde_yaml::from_str(&format!(
        "
targetName: {TEST_TARGET_NAME}
type: {kind:?}
selector:
  matchLabels:
    app: payments
"
    ))
    .unwrap();
    config.endpoints = vec![test_endpoint_config];
    config
}

pub fn test_relabel_config(action: RelabelAction, source_labels: &[&str], regex: &str) -> RelabelConfig {
    RelabelConfig {
        source_labels: source_labels.iter().map(|l| l.to_string()).collect(),
        regex: regex.into(),
        action,
        ..Default::default()
    }
}
