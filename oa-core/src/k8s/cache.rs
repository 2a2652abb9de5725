use std::collections::{
    BTreeMap,
    HashMap,
};
use std::fmt::Debug;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::{
    Arc,
    Mutex,
};

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::reflector::{
    self,
    ObjectRef,
    Store,
};
use kube::runtime::watcher::watcher;
use kube::runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;
use tracing::*;

use crate::prelude::*;

pub type ConfigMapHandler = Box<dyn Fn(&corev1::ConfigMap) + Send + Sync>;

// Aggregated ready/not-ready view of a service's endpoints, deduplicated
// ports included.  The same shape comes out of both backends (EndpointSlice
// v1 on servers >= 1.21, core/v1 Endpoints everywhere else).
#[derive(Clone, Debug, Default)]
pub struct EndpointAddresses {
    pub ready: Vec<String>,
    pub not_ready: Vec<String>,
    pub ports: Vec<EndpointPortView>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointPortView {
    pub name: Option<String>,
    pub port: i32,
}

enum EndpointBackend {
    Slices(Store<discoveryv1::EndpointSlice>),
    Legacy(Store<corev1::Endpoints>),
}

// Read-only, watcher-backed view of the cluster.  Each resource kind gets a
// reflector store fed by a long-running watch task; the kube runtime's
// backoff-and-relist takes the place of the classic informer resync.
pub struct ClusterCache {
    pods: Store<corev1::Pod>,
    services: Store<corev1::Service>,
    endpoint_backend: EndpointBackend,
    namespaces: Store<corev1::Namespace>,
    config_maps: Store<corev1::ConfigMap>,
    secrets: Store<corev1::Secret>,

    cm_handlers: Arc<Mutex<Vec<ConfigMapHandler>>>,
    initialized: AtomicBool,
    watch_tasks: Mutex<JoinSet<()>>,
}

impl ClusterCache {
    pub async fn start(client: kube::Client) -> anyhow::Result<ClusterCache> {
        let version = client.apiserver_version().await?;
        let minor = parse_minor_version(&version.minor);

        let mut js = JoinSet::new();
        let pods = watch_all::<corev1::Pod>(&client, &mut js);
        let services = watch_all::<corev1::Service>(&client, &mut js);
        let namespaces = watch_all::<corev1::Namespace>(&client, &mut js);
        let secrets = watch_all::<corev1::Secret>(&client, &mut js);

        let endpoint_backend = if minor >= ENDPOINT_SLICE_MIN_MINOR_VERSION {
            EndpointBackend::Slices(watch_all::<discoveryv1::EndpointSlice>(&client, &mut js))
        } else {
            info!("apiserver minor version {minor} predates EndpointSlice v1, using Endpoints");
            EndpointBackend::Legacy(watch_all::<corev1::Endpoints>(&client, &mut js))
        };

        let cm_handlers: Arc<Mutex<Vec<ConfigMapHandler>>> = Arc::new(Mutex::new(vec![]));
        let config_maps = watch_config_maps(&client, cm_handlers.clone(), &mut js);

        Ok(ClusterCache {
            pods,
            services,
            endpoint_backend,
            namespaces,
            config_maps,
            secrets,
            cm_handlers,
            initialized: AtomicBool::new(false),
            watch_tasks: Mutex::new(js),
        })
    }

    // Blocks until every store has finished its initial list.
    pub async fn wait_ready(&self) {
        let _ = self.pods.wait_until_ready().await;
        let _ = self.services.wait_until_ready().await;
        let _ = self.namespaces.wait_until_ready().await;
        let _ = self.config_maps.wait_until_ready().await;
        let _ = self.secrets.wait_until_ready().await;
        match &self.endpoint_backend {
            EndpointBackend::Slices(store) => {
                let _ = store.wait_until_ready().await;
            },
            EndpointBackend::Legacy(store) => {
                let _ = store.wait_until_ready().await;
            },
        }
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn get_config_map(&self, ns: &str, name: &str) -> Option<Arc<corev1::ConfigMap>> {
        self.config_maps.get(&ObjectRef::new(name).within(ns))
    }

    pub fn get_secret(&self, ns: &str, name: &str) -> Option<Arc<corev1::Secret>> {
        self.secrets.get(&ObjectRef::new(name).within(ns))
    }

    pub fn get_pods_by_labels(
        &self,
        ns: &str,
        sel: &metav1::LabelSelector,
    ) -> anyhow::Result<Vec<Arc<corev1::Pod>>> {
        let mut pods = vec![];
        for pod in self.pods.state() {
            if pod.namespace().as_deref() == Some(ns) && pod.matches(sel)? {
                pods.push(pod);
            }
        }
        Ok(pods)
    }

    pub fn get_services_by_labels(
        &self,
        ns: &str,
        sel: &metav1::LabelSelector,
    ) -> anyhow::Result<Vec<Arc<corev1::Service>>> {
        let mut services = vec![];
        for svc in self.services.state() {
            if svc.namespace().as_deref() == Some(ns) && svc.matches(sel)? {
                services.push(svc);
            }
        }
        Ok(services)
    }

    pub fn get_namespaces_by_names(&self, names: &[String]) -> Vec<Arc<corev1::Namespace>> {
        self.namespaces
            .state()
            .into_iter()
            .filter(|namespace| names.contains(&namespace.name_any()))
            .collect()
    }

    pub fn get_namespaces_by_labels(&self, sel: &metav1::LabelSelector) -> anyhow::Result<Vec<Arc<corev1::Namespace>>> {
        let mut namespaces = vec![];
        for namespace in self.namespaces.state() {
            if namespace.matches(sel)? {
                namespaces.push(namespace);
            }
        }
        Ok(namespaces)
    }

    pub fn get_endpoints_for_service(&self, ns: &str, name: &str) -> EndpointAddresses {
        match &self.endpoint_backend {
            EndpointBackend::Slices(store) => aggregate_slices(store, ns, name),
            EndpointBackend::Legacy(store) => aggregate_legacy(store, ns, name),
        }
    }

    // Handlers fire only when a ConfigMap's data actually changed, not on
    // every relist.
    pub fn register_config_map_handler<F: Fn(&corev1::ConfigMap) + Send + Sync + 'static>(&self, handler: F) {
        self.cm_handlers.lock().unwrap().push(Box::new(handler));
    }

    pub fn shutdown(&self) {
        self.watch_tasks.lock().unwrap().abort_all();
    }
}

#[cfg(feature = "testutils")]
impl ClusterCache {
    // Assembles a cache straight from reflector stores, no apiserver in
    // sight; the watch task set stays empty.
    #[allow(clippy::too_many_arguments)]
    pub fn new_from_parts(
        pods: Store<corev1::Pod>,
        services: Store<corev1::Service>,
        endpoint_slices: Store<discoveryv1::EndpointSlice>,
        namespaces: Store<corev1::Namespace>,
        config_maps: Store<corev1::ConfigMap>,
        secrets: Store<corev1::Secret>,
        synced: bool,
    ) -> ClusterCache {
        ClusterCache {
            pods,
            services,
            endpoint_backend: EndpointBackend::Slices(endpoint_slices),
            namespaces,
            config_maps,
            secrets,
            cm_handlers: Arc::new(Mutex::new(vec![])),
            initialized: AtomicBool::new(synced),
            watch_tasks: Mutex::new(JoinSet::new()),
        }
    }
}

fn watch_all<K>(client: &kube::Client, js: &mut JoinSet<()>) -> Store<K>
where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let api: Api<K> = Api::all(client.clone());
    let (reader, writer) = reflector::store();
    let mut stream = watcher(api, Default::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .boxed();

    js.spawn(async move {
        while let Some(ev) = stream.next().await {
            if let Err(err) = ev {
                warn!("watch error for {}: {err}", std::any::type_name::<K>());
            }
        }
    });
    reader
}

fn watch_config_maps(
    client: &kube::Client,
    handlers: Arc<Mutex<Vec<ConfigMapHandler>>>,
    js: &mut JoinSet<()>,
) -> Store<corev1::ConfigMap> {
    let api: Api<corev1::ConfigMap> = Api::all(client.clone());
    let (reader, writer) = reflector::store();
    let mut stream = watcher(api, Default::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .boxed();

    js.spawn(async move {
        let mut seen: HashMap<String, Option<BTreeMap<String, String>>> = HashMap::new();
        while let Some(ev) = stream.next().await {
            match ev {
                Ok(cm) => {
                    let key = cm.namespaced_name();
                    if seen.get(&key) == Some(&cm.data) {
                        continue;
                    }
                    seen.insert(key, cm.data.clone());
                    for handler in handlers.lock().unwrap().iter() {
                        handler(&cm);
                    }
                },
                Err(err) => warn!("configmap watch error: {err}"),
            }
        }
    });
    reader
}

pub(crate) fn aggregate_slices(store: &Store<discoveryv1::EndpointSlice>, ns: &str, name: &str) -> EndpointAddresses {
    let mut view = EndpointAddresses::default();
    for slice in store.state() {
        if slice.namespace().as_deref() != Some(ns) || slice.labels().get(SERVICE_NAME_LABEL_KEY).map(|s| s.as_str()) != Some(name) {
            continue;
        }

        for endpoint in &slice.endpoints {
            // An absent ready condition means "ready" per the EndpointSlice API
            let ready = endpoint.conditions.as_ref().and_then(|c| c.ready).unwrap_or(true);
            let bucket = if ready { &mut view.ready } else { &mut view.not_ready };
            bucket.extend(endpoint.addresses.iter().cloned());
        }

        for port in slice.ports.iter().flatten() {
            let Some(number) = port.port else { continue };
            let pv = EndpointPortView { name: port.name.clone(), port: number };
            if !view.ports.contains(&pv) {
                view.ports.push(pv);
            }
        }
    }
    view
}

pub(crate) fn aggregate_legacy(store: &Store<corev1::Endpoints>, ns: &str, name: &str) -> EndpointAddresses {
    let mut view = EndpointAddresses::default();
    let Some(endpoints) = store.get(&ObjectRef::new(name).within(ns)) else {
        return view;
    };

    for subset in endpoints.subsets.iter().flatten() {
        for addr in subset.addresses.iter().flatten() {
            view.ready.push(addr.ip.clone());
        }
        for addr in subset.not_ready_addresses.iter().flatten() {
            view.not_ready.push(addr.ip.clone());
        }
        for port in subset.ports.iter().flatten() {
            let pv = EndpointPortView { name: port.name.clone(), port: port.port };
            if !view.ports.contains(&pv) {
                view.ports.push(pv);
            }
        }
    }
    view
}

fn parse_minor_version(minor: &str) -> u32 {
    // GKE and friends report things like "28+"
    minor
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}
