use std::collections::BTreeMap;
use std::sync::Arc;

use oa_core::config::{
    EndpointConfig,
    MonitorKind,
    TargetConfig,
};
use oa_core::errors::*;
use oa_core::k8s::ClusterCache;
use oa_core::prelude::*;
use tracing::*;

use super::*;
use crate::target::{
    Target,
    TargetMetadata,
    TargetState,
};

pub(crate) fn resolve(config: &TargetConfig, cache: &Arc<ClusterCache>) -> anyhow::Result<Vec<Target>> {
    let mut targets = vec![];
    let selector = config.selector.to_label_selector();

    for ns in resolve_namespaces(cache, &config.namespace_selector)? {
        let pods = cache.get_pods_by_labels(&ns, &selector)?;
        if pods.is_empty() {
            debug!("no pods match {} in namespace {ns}", config.target_name);
            continue;
        }

        for pod in pods {
            for endpoint in &config.endpoints {
                match build_pod_target(config, endpoint, &pod, &ns) {
                    Ok(target) => targets.push(target),
                    Err(err) => debug!("skipping endpoint on pod {}: {err}", pod.name_any()),
                }
            }
        }
    }
    Ok(targets)
}

pub(crate) fn build_pod_target(
    config: &TargetConfig,
    endpoint: &EndpointConfig,
    pod: &corev1::Pod,
    ns: &str,
) -> anyhow::Result<Target> {
    let (port, port_name) = resolve_pod_port(pod, &endpoint.port)?;
    let pod_ip = pod
        .status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .ok_or_else(|| anyhow!("pod {} has no ip yet", pod.name_any()))?;

    let scheme = infer_scheme(endpoint, port_name.as_deref());
    let path = endpoint_path(endpoint);
    let url = build_url(&scheme, &format!("{pod_ip}:{port}"), &path, endpoint)?;
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());

    let mut labels = BTreeMap::from([
        ("job".to_string(), config.target_name.clone()),
        ("namespace".to_string(), ns.to_string()),
        ("pod".to_string(), pod.name_any()),
        ("instance".to_string(), format!("{pod_ip}:{port}")),
    ]);
    if endpoint.add_node_label
        && let Some(node) = &node_name
    {
        labels.insert("node".into(), node.clone());
    }

    let state = if pod_is_ready(pod) { TargetState::Ready } else { TargetState::Pending };

    Ok(Target::new(
        target_id(&config.target_name, ns, &pod.name_any(), &port.to_string(), &path),
        url,
        labels,
        TargetMetadata {
            target_name: config.target_name.clone(),
            kind: MonitorKind::PodMonitor,
            namespace: ns.to_string(),
            endpoint: endpoint.clone(),
            node_name,
        },
        state,
    ))
}

// Named ports resolve through the pod's container ports; anything else must
// parse as a number.
pub(crate) fn resolve_pod_port(pod: &corev1::Pod, port: &str) -> anyhow::Result<(i32, Option<String>)> {
    if let Some(spec) = &pod.spec {
        for container in &spec.containers {
            for container_port in container.ports.iter().flatten() {
                if container_port.name.as_deref() == Some(port) {
                    return Ok((container_port.container_port, Some(port.to_string())));
                }
            }
        }
    }

    match port.parse::<i32>() {
        Ok(number) => Ok((number, None)),
        Err(_) => Err(DiscoveryError::unresolvable_port(port)),
    }
}

// Ready iff the pod is Running and its PodReady condition is True
pub(crate) fn pod_is_ready(pod: &corev1::Pod) -> bool {
    let Some(status) = &pod.status else { return false };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}
