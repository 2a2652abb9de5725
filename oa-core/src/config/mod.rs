mod file;
mod kube;
mod model;

use std::sync::RwLock;
use std::time::Duration;

use tracing::*;

pub use self::file::FileWatcher;
pub use self::kube::attach_to_config_map;
pub use self::model::*;
use crate::constants::*;

// Latest parsed scrape configuration.  Writers (the file watcher or the
// ConfigMap handler) swap the whole snapshot under the write lock; readers
// always get copies, never references into the tree.
pub struct ConfigStore {
    inner: RwLock<OpenAgentConfig>,
}

impl ConfigStore {
    pub fn new(initial: OpenAgentConfig) -> ConfigStore {
        ConfigStore { inner: RwLock::new(initial) }
    }

    pub fn replace(&self, next: OpenAgentConfig) {
        *self.inner.write().unwrap() = next;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.read().unwrap().enabled
    }

    pub fn scrape_configs(&self) -> Vec<TargetConfig> {
        self.inner.read().unwrap().targets.clone()
    }

    // global default for endpoints that don't set their own interval
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(DEFAULT_SCRAPE_INTERVAL_SECONDS)
    }

    // tick of the scraper manager's reconciliation loop
    pub fn scraping_interval(&self) -> Duration {
        let raw = self.inner.read().unwrap().scraping_interval.clone();
        Duration::from_secs(parse_interval(&raw, DEFAULT_SCRAPING_INTERVAL_SECONDS))
    }

    // floor for any per-endpoint interval
    pub fn minimum_interval(&self) -> Duration {
        let raw = self.inner.read().unwrap().minimum_interval.clone();
        Duration::from_secs(parse_interval(&raw, DEFAULT_MINIMUM_INTERVAL_SECONDS))
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.read().unwrap().max_concurrency
    }
}

// Durations in the config file use the `15s`/`1m` suffix form; bare digits
// are seconds.  Anything unparseable falls back to the supplied default.
pub fn parse_interval(raw: &str, default_seconds: u64) -> u64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return default_seconds;
    }

    let (digits, multiplier) = match raw.strip_suffix('s') {
        Some(d) => (d, 1),
        None => match raw.strip_suffix('m') {
            Some(d) => (d, 60),
            None => (raw, 1),
        },
    };

    match digits.parse::<u64>() {
        Ok(n) => n * multiplier,
        Err(_) => {
            warn!("unparseable interval {raw:?}, using default of {default_seconds}s");
            default_seconds
        },
    }
}
