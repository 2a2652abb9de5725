use std::collections::BTreeMap;

use serde::Deserialize;

use crate::prelude::*;

// Typed view of scrape_config.yaml.  Everything is normalized at parse time;
// nothing downstream ever sees an untyped YAML tree.

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeConfig {
    #[serde(default)]
    pub features: Features,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    #[serde(default)]
    pub open_agent: OpenAgentConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAgentConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub scraping_interval: String,

    // 0 = auto
    #[serde(default)]
    pub max_concurrency: usize,

    #[serde(default)]
    pub minimum_interval: String,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub enum MonitorKind {
    PodMonitor,
    ServiceMonitor,
    StaticEndpoints,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub target_name: String,

    #[serde(rename = "type")]
    pub kind: MonitorKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub namespace_selector: NamespaceSelectorConfig,

    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    // StaticEndpoints only
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelectorConfig {
    #[serde(default)]
    pub match_names: Vec<String>,

    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub match_expressions: Vec<metav1::LabelSelectorRequirement>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorConfig {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub match_expressions: Vec<metav1::LabelSelectorRequirement>,
}

impl SelectorConfig {
    pub fn to_label_selector(&self) -> metav1::LabelSelector {
        metav1::LabelSelector {
            match_labels: (!self.match_labels.is_empty()).then(|| self.match_labels.clone()),
            match_expressions: (!self.match_expressions.is_empty()).then(|| self.match_expressions.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }
}

impl NamespaceSelectorConfig {
    pub fn to_label_selector(&self) -> metav1::LabelSelector {
        metav1::LabelSelector {
            match_labels: (!self.match_labels.is_empty()).then(|| self.match_labels.clone()),
            match_expressions: (!self.match_expressions.is_empty()).then(|| self.match_expressions.clone()),
        }
    }

    pub fn has_label_terms(&self) -> bool {
        !self.match_labels.is_empty() || !self.match_expressions.is_empty()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    // port name or numeric string
    pub port: String,

    // StaticEndpoints only
    pub address: String,

    pub path: String,
    pub scheme: String,
    pub interval: String,
    pub timeout: String,
    pub tls_config: Option<TlsConfig>,
    pub basic_auth: Option<BasicAuth>,
    pub params: BTreeMap<String, ParamValue>,
    pub metric_relabel_configs: Vec<RelabelConfig>,
    pub add_node_label: bool,
    pub adaptive_timeout: Option<AdaptiveTimeout>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    pub insecure_skip_verify: bool,
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
}

impl TlsConfig {
    pub fn is_empty(&self) -> bool {
        *self == TlsConfig::default()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    pub username: CredentialSource,
    pub password: CredentialSource,
}

// Either an inline literal or a reference into a Secret in the target's
// namespace (the Prometheus Operator shape).
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum CredentialSource {
    Literal(String),
    FromSecret {
        #[serde(rename = "secretKeyRef")]
        secret_key_ref: SecretKeySelector,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

// Query params may be single- or multi-valued
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    One(String),
    Many(Vec<String>),
}

impl ParamValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            ParamValue::One(v) => vec![v.as_str()],
            ParamValue::Many(vs) => vs.iter().map(|v| v.as_str()).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RelabelAction {
    #[default]
    Replace,
    Keep,
    Drop,
    Hashmod,
    Labelmap,
    Labeldrop,
    Labelkeep,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelabelConfig {
    pub source_labels: Vec<String>,
    pub separator: String,
    pub regex: String,
    pub action: RelabelAction,
    pub target_label: String,
    pub replacement: String,
    pub modulus: u64,
}

impl Default for RelabelConfig {
    fn default() -> Self {
        RelabelConfig {
            source_labels: vec![],
            separator: ";".into(),
            regex: "(.*)".into(),
            action: RelabelAction::Replace,
            target_label: String::new(),
            replacement: "$1".into(),
            modulus: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdaptiveTimeout {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub multiplier: f64,
}

fn default_true() -> bool {
    true
}
