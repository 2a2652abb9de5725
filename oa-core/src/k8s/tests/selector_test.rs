use super::*;

fn build_label_sel(key: &str, op: &str, values: Option<Vec<&str>>) -> metav1::LabelSelector {
    metav1::LabelSelector {
        match_expressions: Some(vec![metav1::LabelSelectorRequirement {
            key: key.into(),
            operator: op.into(),
            values: values.map(|vs| vs.into_iter().map(|v| v.into()).collect()),
        }]),
        ..Default::default()
    }
}

#[rstest]
#[case::in_matches("app", "In", Some(vec!["payments", "billing"]), true)]
#[case::in_no_match("app", "In", Some(vec!["billing"]), false)]
#[case::in_missing_key("tier", "In", Some(vec!["payments"]), false)]
#[case::not_in("app", "NotIn", Some(vec!["billing"]), true)]
#[case::not_in_match("app", "NotIn", Some(vec!["payments"]), false)]
#[case::not_in_missing_key("tier", "NotIn", Some(vec!["payments"]), true)]
#[case::exists("app", "Exists", None, true)]
#[case::exists_missing("tier", "Exists", None, false)]
#[case::does_not_exist("tier", "DoesNotExist", None, true)]
#[case::does_not_exist_present("app", "DoesNotExist", None, false)]
fn test_match_expressions(
    test_pod: corev1::Pod,
    #[case] key: &str,
    #[case] op: &str,
    #[case] values: Option<Vec<&str>>,
    #[case] expected: bool,
) {
    let sel = build_label_sel(key, op, values);
    assert_eq!(test_pod.matches(&sel).unwrap(), expected);
}

#[rstest]
#[case::in_empty_values("In", Some(vec![]))]
#[case::exists_with_values("Exists", Some(vec!["payments"]))]
#[case::unknown_operator("Matches", None)]
fn test_malformed_expressions(test_pod: corev1::Pod, #[case] op: &str, #[case] values: Option<Vec<&str>>) {
    let sel = build_label_sel("app", op, values);
    assert!(test_pod.matches(&sel).is_err());
}

#[rstest]
fn test_match_labels(test_pod: corev1::Pod) {
    let sel = metav1::LabelSelector {
        match_labels: Some([("app".to_string(), "payments".to_string())].into()),
        ..Default::default()
    };
    assert!(test_pod.matches(&sel).unwrap());

    let sel = metav1::LabelSelector {
        match_labels: Some([("app".to_string(), "billing".to_string())].into()),
        ..Default::default()
    };
    assert!(!test_pod.matches(&sel).unwrap());
}

// matchLabels and matchExpressions combine with AND semantics
#[rstest]
fn test_combined_selector(test_pod: corev1::Pod) {
    let sel = metav1::LabelSelector {
        match_labels: Some([("app".to_string(), "payments".to_string())].into()),
        match_expressions: Some(vec![metav1::LabelSelectorRequirement {
            key: "tier".into(),
            operator: "Exists".into(),
            values: None,
        }]),
    };
    assert!(!test_pod.matches(&sel).unwrap());
}

#[rstest]
fn test_empty_selector_matches_all(test_pod: corev1::Pod) {
    assert!(test_pod.matches(&Default::default()).unwrap());
}

#[rstest]
fn test_namespaced_name(test_pod: corev1::Pod) {
    assert_eq!(test_pod.namespaced_name(), format!("{TEST_NAMESPACE}/{TEST_POD}"));
}
