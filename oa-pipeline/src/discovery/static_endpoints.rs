use std::collections::BTreeMap;

use oa_core::config::{
    MonitorKind,
    TargetConfig,
};
use tracing::*;

use super::*;
use crate::target::{
    Target,
    TargetMetadata,
    TargetState,
};

// Static targets skip the cluster entirely: every configured address ×
// endpoint path is a ready Target.
pub(crate) fn resolve(config: &TargetConfig) -> Vec<Target> {
    let mut targets = vec![];
    for address in &config.addresses {
        for endpoint in &config.endpoints {
            // StaticEndpoints may also carry the address on the endpoint itself
            let address = if endpoint.address.is_empty() { address } else { &endpoint.address };

            let scheme = infer_scheme(endpoint, None);
            let path = endpoint_path(endpoint);
            let url = match build_url(&scheme, address, &path, endpoint) {
                Ok(url) => url,
                Err(err) => {
                    warn!("bad static address {address:?} in {}: {err}", config.target_name);
                    continue;
                },
            };

            let labels = BTreeMap::from([
                ("job".to_string(), config.target_name.clone()),
                ("instance".to_string(), address.to_string()),
            ]);

            targets.push(Target::new(
                target_id(&config.target_name, "static", address, "", &path),
                url,
                labels,
                TargetMetadata {
                    target_name: config.target_name.clone(),
                    kind: MonitorKind::StaticEndpoints,
                    namespace: String::new(),
                    endpoint: endpoint.clone(),
                    node_name: None,
                },
                TargetState::Ready,
            ));
        }
    }
    targets
}
