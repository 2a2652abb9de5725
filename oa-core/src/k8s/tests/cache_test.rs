use kube::runtime::reflector;
use kube::runtime::watcher::Event;

use super::*;
use crate::k8s::cache::{
    aggregate_legacy,
    aggregate_slices,
};

#[rstest]
fn test_aggregate_slices(test_endpoint_slice: discoveryv1::EndpointSlice) {
    let (store, mut writer) = reflector::store();
    writer.apply_watcher_event(&Event::Apply(test_endpoint_slice.clone()));

    // A second slice for the same service carrying a duplicate port and one
    // more ready address
    let mut second = test_endpoint_slice;
    second.metadata.name = Some(format!("{TEST_SERVICE}-def34"));
    second.endpoints = vec![discoveryv1::Endpoint {
        addresses: vec!["10.1.2.5".into()],
        conditions: Some(discoveryv1::EndpointConditions { ready: Some(true), ..Default::default() }),
        ..Default::default()
    }];
    writer.apply_watcher_event(&Event::Apply(second));

    let view = aggregate_slices(&store, TEST_NAMESPACE, TEST_SERVICE);
    assert_eq!(view.ready, vec!["10.1.2.3", "10.1.2.5"]);
    assert_eq!(view.not_ready, vec!["10.1.2.4"]);
    assert_eq!(view.ports.len(), 1);
    assert_eq!(view.ports[0].name.as_deref(), Some("metrics"));
    assert_eq!(view.ports[0].port, 9100);
}

#[rstest]
fn test_aggregate_slices_ignores_other_services(test_endpoint_slice: discoveryv1::EndpointSlice) {
    let (store, mut writer) = reflector::store();
    writer.apply_watcher_event(&Event::Apply(test_endpoint_slice));

    let view = aggregate_slices(&store, TEST_NAMESPACE, "some-other-service");
    assert!(view.ready.is_empty());
    assert!(view.not_ready.is_empty());
    assert!(view.ports.is_empty());
}

#[rstest]
fn test_aggregate_slices_missing_ready_condition_counts_ready() {
    let (store, mut writer) = reflector::store();
    let slice = discoveryv1::EndpointSlice {
        metadata: metav1::ObjectMeta {
            namespace: Some(TEST_NAMESPACE.into()),
            name: Some(format!("{TEST_SERVICE}-xyz99")),
            labels: crate::klabel!(SERVICE_NAME_LABEL_KEY => TEST_SERVICE),
            ..Default::default()
        },
        address_type: "IPv4".into(),
        endpoints: vec![discoveryv1::Endpoint { addresses: vec!["10.9.9.9".into()], ..Default::default() }],
        ports: None,
    };
    writer.apply_watcher_event(&Event::Apply(slice));

    let view = aggregate_slices(&store, TEST_NAMESPACE, TEST_SERVICE);
    assert_eq!(view.ready, vec!["10.9.9.9"]);
}

#[rstest]
fn test_aggregate_legacy(test_endpoints: corev1::Endpoints) {
    let (store, mut writer) = reflector::store();
    writer.apply_watcher_event(&Event::Apply(test_endpoints));

    let view = aggregate_legacy(&store, TEST_NAMESPACE, TEST_SERVICE);
    assert_eq!(view.ready, vec!["10.1.2.3"]);
    assert_eq!(view.not_ready, vec!["10.1.2.4"]);
    assert_eq!(view.ports, vec![EndpointPortView { name: Some("metrics".into()), port: 9100 }]);
}

#[rstest]
fn test_aggregate_legacy_absent_service() {
    let (store, _writer) = reflector::store::<corev1::Endpoints>();
    let view = aggregate_legacy(&store, TEST_NAMESPACE, TEST_SERVICE);
    assert!(view.ready.is_empty());
}
