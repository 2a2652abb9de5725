// Env vars
pub const WHATAP_HOME_ENV_VAR: &str = "WHATAP_HOME";
pub const WHATAP_OPEN_HOME_ENV_VAR: &str = "WHATAP_OPEN_HOME";
pub const POD_NAMESPACE_ENV_VAR: &str = "POD_NAMESPACE";

// Conf keys (whatap.conf)
pub const LICENSE_CONF_KEY: &str = "WHATAP_LICENSE";
pub const HOST_CONF_KEY: &str = "WHATAP_HOST";
pub const PORT_CONF_KEY: &str = "WHATAP_PORT";
pub const DEBUG_CONF_KEY: &str = "debug";

// Well-known files
pub const AGENT_CONF_FILE: &str = "whatap.conf";
pub const SCRAPE_CONFIG_FILE: &str = "scrape_config.yaml";
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const SERVICE_ACCOUNT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
pub const SERVICE_ACCOUNT_NS_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

// Well-known labels
pub const SERVICE_NAME_LABEL_KEY: &str = "kubernetes.io/service-name";
pub const METADATA_NAME_LABEL_KEY: &str = "kubernetes.io/metadata.name";

// Defaults
pub const DEFAULT_COLLECTOR_PORT: u16 = 6600;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_SCRAPE_INTERVAL_SECONDS: u64 = 15;
pub const DEFAULT_SCRAPE_TIMEOUT_SECONDS: u64 = 10;
pub const ADAPTIVE_TIMEOUT_CEILING_FACTOR: u32 = 5;
pub const DEFAULT_SCRAPING_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_MINIMUM_INTERVAL_SECONDS: u64 = 1;

// Queues
pub const RAW_QUEUE_CAPACITY: usize = 10_000;
pub const PROCESSED_QUEUE_CAPACITY: usize = 10_000;

// Timing
pub const DISCOVERY_TICK_SECONDS: u64 = 15;
pub const CONFIG_FILE_POLL_SECONDS: u64 = 3;
pub const AGENT_CONF_POLL_SECONDS: u64 = 5;
pub const RESTART_DELAY_SECONDS: u64 = 5;
pub const SEND_RETRY_COUNT: usize = 3;
pub const SEND_RETRY_DELAY_SECONDS: u64 = 5;
pub const SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
pub const WARMUP_WINDOW_SECONDS: u64 = 120;

// Packing
pub const PACK_CHUNK_SIZE: usize = 1000;

// The EndpointSlice v1 API went GA in 1.21; anything older gets the legacy
// core/v1 Endpoints view instead.
pub const ENDPOINT_SLICE_MIN_MINOR_VERSION: u32 = 21;

#[cfg(feature = "testutils")]
mod test_constants {
    pub const TEST_NAMESPACE: &str = "test";
    pub const TEST_TARGET_NAME: &str = "the-target";
    pub const TEST_POD: &str = "the-pod";
    pub const TEST_SERVICE: &str = "the-service";
    pub const TEST_NODE: &str = "node-1";
    pub const TEST_POD_IP: &str = "10.1.2.3";
}

#[cfg(feature = "testutils")]
pub use test_constants::*;
