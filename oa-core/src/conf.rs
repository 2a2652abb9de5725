use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::{
    Arc,
    RwLock,
};
use std::time::{
    Duration,
    SystemTime,
};

use tokio::sync::watch;
use tracing::*;

use crate::constants::*;
use crate::errors::*;

err_impl! {ConfError,
    #[error("required conf key missing: {0}")]
    MissingKey(String),
}

// Flat key=value agent configuration (whatap.conf).  Lookup order for every
// key: inline file value, then the process environment, then empty.  The file
// is re-read on a 5s mtime tick so operators can flip `debug` without a
// restart.
pub struct AgentConf {
    path: PathBuf,
    inner: RwLock<ConfSnapshot>,
}

#[derive(Clone, Debug, Default)]
struct ConfSnapshot {
    values: HashMap<String, String>,
    mtime: Option<SystemTime>,
}

impl AgentConf {
    pub fn load(home: &Path) -> anyhow::Result<Arc<AgentConf>> {
        let path = home.join(AGENT_CONF_FILE);
        let snapshot = read_conf_file(&path).unwrap_or_default();
        Ok(Arc::new(AgentConf { path, inner: RwLock::new(snapshot) }))
    }

    pub fn get(&self, key: &str) -> String {
        let inline = self.inner.read().unwrap().values.get(key).cloned();
        match inline {
            Some(v) if !v.is_empty() => v,
            _ => env::var(key).unwrap_or_default(),
        }
    }

    pub fn license(&self) -> anyhow::Result<String> {
        self.require(LICENSE_CONF_KEY)
    }

    // slash-separated list of collector hosts
    pub fn hosts(&self) -> anyhow::Result<Vec<String>> {
        let raw = self.require(HOST_CONF_KEY)?;
        Ok(raw.split('/').filter(|h| !h.is_empty()).map(|h| h.to_string()).collect())
    }

    pub fn port(&self) -> u16 {
        self.get(PORT_CONF_KEY).parse().unwrap_or(DEFAULT_COLLECTOR_PORT)
    }

    pub fn is_debug_enabled(&self) -> bool {
        matches!(self.get(DEBUG_CONF_KEY).to_lowercase().as_str(), "true" | "yes" | "1")
    }

    fn require(&self, key: &str) -> anyhow::Result<String> {
        let v = self.get(key);
        if v.is_empty() {
            return Err(ConfError::missing_key(key));
        }
        Ok(v)
    }

    // Re-reads the conf file if its mtime moved, until shutdown.
    pub async fn watch(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> EmptyResult {
        let mut ticker = tokio::time::interval(Duration::from_secs(AGENT_CONF_POLL_SECONDS));
        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = ticker.tick() => self.reload_if_changed(),
                _ = shutdown_rx.changed() => break,
            }
        }
        Ok(())
    }

    pub(crate) fn reload_if_changed(&self) {
        let current_mtime = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if current_mtime == self.inner.read().unwrap().mtime {
            return;
        }

        match read_conf_file(&self.path) {
            Some(snapshot) => {
                debug!("reloaded {}", self.path.display());
                *self.inner.write().unwrap() = snapshot;
            },
            None => warn!("could not read {}, keeping previous values", self.path.display()),
        }
    }
}

fn read_conf_file(path: &Path) -> Option<ConfSnapshot> {
    let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
    let contents = fs::read_to_string(path).ok()?;

    let mut values = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Some(ConfSnapshot { values, mtime })
}
