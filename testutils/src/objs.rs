use k8s_openapi::ByteString;
use oa_core::klabel;
use oa_core::prelude::*;
use rstest::fixture;

#[fixture]
pub fn test_pod(#[default(TEST_POD.into())] name: String) -> corev1::Pod {
    corev1::Pod {
        metadata: metav1::ObjectMeta {
            namespace: Some(TEST_NAMESPACE.into()),
            name: Some(name),
            labels: klabel!("app" => "payments"),
            ..Default::default()
        },
        spec: Some(corev1::PodSpec {
            node_name: Some(TEST_NODE.into()),
            containers: vec![corev1::Container {
                name: "main".into(),
                ports: Some(vec![corev1::ContainerPort {
                    name: Some("metrics".into()),
                    container_port: 9100,
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(corev1::PodStatus {
            phase: Some("Running".into()),
            pod_ip: Some(TEST_POD_IP.into()),
            conditions: Some(vec![corev1::PodCondition {
                type_: "Ready".into(),
                status: "True".into(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

pub fn set_pod_unready(pod: &mut corev1::Pod) {
    if let Some(status) = pod.status.as_mut()
        && let Some(conditions) = status.conditions.as_mut()
        && let Some(ready) = conditions.iter_mut().find(|c| c.type_ == "Ready")
    {
        ready.status = "False".into();
    }
}

pub fn set_pod_pending(pod: &mut corev1::Pod) {
    if let Some(status) = pod.status.as_mut() {
        status.phase = Some("Pending".into());
    }
}

#[fixture]
pub fn test_service(#[default(TEST_SERVICE.into())] name: String) -> corev1::Service {
    corev1::Service {
        metadata: metav1::ObjectMeta {
            namespace: Some(TEST_NAMESPACE.into()),
            name: Some(name),
            labels: klabel!("app" => "payments"),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[fixture]
pub fn test_endpoint_slice() -> discoveryv1::EndpointSlice {
    discoveryv1::EndpointSlice {
        metadata: metav1::ObjectMeta {
            namespace: Some(TEST_NAMESPACE.into()),
            name: Some(format!("{TEST_SERVICE}-abc12")),
            labels: klabel!(SERVICE_NAME_LABEL_KEY => TEST_SERVICE),
            ..Default::default()
        },
        address_type: "IPv4".into(),
        endpoints: vec![
            discoveryv1::Endpoint {
                addresses: vec!["10.1.2.3".into()],
                conditions: Some(discoveryv1::EndpointConditions {
                    ready: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            discoveryv1::Endpoint {
                addresses: vec!["10.1.2.4".into()],
                conditions: Some(discoveryv1::EndpointConditions {
                    ready: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ],
        ports: Some(vec![discoveryv1::EndpointPort {
            name: Some("metrics".into()),
            port: Some(9100),
            ..Default::default()
        }]),
    }
}

#[fixture]
pub fn test_endpoints() -> corev1::Endpoints {
    corev1::Endpoints {
        metadata: metav1::ObjectMeta {
            namespace: Some(TEST_NAMESPACE.into()),
            name: Some(TEST_SERVICE.into()),
            ..Default::default()
        },
        subsets: Some(vec![corev1::EndpointSubset {
            addresses: Some(vec![corev1::EndpointAddress { ip: "10.1.2.3".into(), ..Default::default() }]),
            not_ready_addresses: Some(vec![corev1::EndpointAddress {
                ip: "10.1.2.4".into(),
                ..Default::default()
            }]),
            ports: Some(vec![corev1::EndpointPort {
                name: Some("metrics".into()),
                port: 9100,
                ..Default::default()
            }]),
        }]),
    }
}

#[fixture]
pub fn test_namespace(#[default(TEST_NAMESPACE.into())] name: String) -> corev1::Namespace {
    corev1::Namespace {
        metadata: metav1::ObjectMeta {
            name: Some(name),
            labels: klabel!("team" => "payments"),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[fixture]
pub fn test_secret() -> corev1::Secret {
    corev1::Secret {
        metadata: metav1::ObjectMeta {
            namespace: Some(TEST_NAMESPACE.into()),
            name: Some("scrape-creds".into()),
            ..Default::default()
        },
        data: Some(
            [
                ("username".to_string(), ByteString(b"scraper".to_vec())),
                ("password".to_string(), ByteString(b"hunter2".to_vec())),
            ]
            .into(),
        ),
        ..Default::default()
    }
}
