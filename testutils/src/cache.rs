use std::sync::Arc;

use kube::runtime::reflector::{
    self,
    Store,
};
use kube::runtime::watcher::Event;
use oa_core::k8s::ClusterCache;
use oa_core::prelude::*;

pub fn store_of<K>(objs: Vec<K>) -> Store<K>
where
    K: kube::Resource<DynamicType = ()> + Clone + 'static,
{
    let (store, mut writer) = reflector::store();
    for obj in objs {
        writer.apply_watcher_event(&Event::Apply(obj));
    }
    store
}

// A fully-synced ClusterCache built from in-memory objects.  Fill in the
// kinds a test needs; everything else stays empty.
#[derive(Default)]
pub struct FakeClusterCache {
    pub pods: Vec<corev1::Pod>,
    pub services: Vec<corev1::Service>,
    pub endpoint_slices: Vec<discoveryv1::EndpointSlice>,
    pub namespaces: Vec<corev1::Namespace>,
    pub config_maps: Vec<corev1::ConfigMap>,
    pub secrets: Vec<corev1::Secret>,
    pub not_synced: bool,
}

impl FakeClusterCache {
    pub fn build(self) -> Arc<ClusterCache> {
        Arc::new(ClusterCache::new_from_parts(
            store_of(self.pods),
            store_of(self.services),
            store_of(self.endpoint_slices),
            store_of(self.namespaces),
            store_of(self.config_maps),
            store_of(self.secrets),
            !self.not_synced,
        ))
    }
}
