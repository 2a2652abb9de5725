use std::collections::BTreeMap;
use std::sync::Arc;

use oa_core::config::{
    EndpointConfig,
    MonitorKind,
    TargetConfig,
};
use oa_core::k8s::{
    ClusterCache,
    EndpointAddresses,
};
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
        for service in cache.get_services_by_labels(&ns, &selector)? {
            let service_name = service.name_any();
            let view = cache.get_endpoints_for_service(&ns, &service_name);
            if view.ready.is_empty() && view.not_ready.is_empty() {
                debug!("service {ns}/{service_name} has no endpoints");
                continue;
            }

            for endpoint in &config.endpoints {
                let (port, port_name) = match resolve_service_port(&view, &endpoint.port) {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        debug!("skipping endpoint on service {ns}/{service_name}: {err}");
                        continue;
                    },
                };

                for address in &view.ready {
                    targets.push(build_service_target(
                        config,
                        endpoint,
                        &ns,
                        &service_name,
                        address,
                        port,
                        port_name.as_deref(),
                        TargetState::Ready,
                    )?);
                }
                for address in &view.not_ready {
                    targets.push(build_service_target(
                        config,
                        endpoint,
                        &ns,
                        &service_name,
                        address,
                        port,
                        port_name.as_deref(),
                        TargetState::Pending,
                    )?);
                }
            }
        }
    }
    Ok(targets)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn build_service_target(
    config: &TargetConfig,
    endpoint: &EndpointConfig,
    ns: &str,
    service_name: &str,
    address: &str,
    port: i32,
    port_name: Option<&str>,
    state: TargetState,
) -> anyhow::Result<Target> {
    let scheme = infer_scheme(endpoint, port_name);
    let path = endpoint_path(endpoint);
    let url = build_url(&scheme, &format!("{address}:{port}"), &path, endpoint)?;

    let labels = BTreeMap::from([
        ("job".to_string(), config.target_name.clone()),
        ("namespace".to_string(), ns.to_string()),
        ("service".to_string(), service_name.to_string()),
        ("instance".to_string(), format!("{address}:{port}")),
    ]);

    Ok(Target::new(
        target_id(
            &config.target_name,
            ns,
            &format!("{service_name}-{address}"),
            &port.to_string(),
            &path,
        ),
        url,
        labels,
        TargetMetadata {
            target_name: config.target_name.clone(),
            kind: MonitorKind::ServiceMonitor,
            namespace: ns.to_string(),
            endpoint: endpoint.clone(),
            node_name: None,
        },
        state,
    ))
}

// Look the port up by name in the aggregated subset ports, else parse it as
// a number.
pub(crate) fn resolve_service_port(view: &EndpointAddresses, port: &str) -> anyhow::Result<(i32, Option<String>)> {
    for pv in &view.ports {
        if pv.name.as_deref() == Some(port) {
            return Ok((pv.port, Some(port.to_string())));
        }
    }

    match port.parse::<i32>() {
        Ok(number) => Ok((number, None)),
        Err(_) => Err(DiscoveryError::unresolvable_port(port)),
    }
}
