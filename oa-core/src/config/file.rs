use std::fs;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::Arc;
use std::time::{
    Duration,
    SystemTime,
};

use tokio::sync::watch;
use tracing::*;

use super::model::{
    OpenAgentConfig,
    ScrapeConfig,
};
use super::ConfigStore;
use crate::constants::*;

pub fn load_scrape_config(path: &Path) -> anyhow::Result<OpenAgentConfig> {
    let config: ScrapeConfig = serde_yaml::from_reader(fs::File::open(path)?)?;
    Ok(config.features.open_agent)
}

// Polls scrape_config.yaml on a 3s mtime tick and swaps the store snapshot
// whenever the file actually changed.  A missing file at construction is
// fatal; a bad parse mid-run keeps the last good snapshot.
pub struct FileWatcher {
    path: PathBuf,
    store: Arc<ConfigStore>,
    last_mtime: Option<SystemTime>,
}

impl FileWatcher {
    pub fn new(path: PathBuf) -> anyhow::Result<(Arc<ConfigStore>, FileWatcher)> {
        let initial = load_scrape_config(&path)?;
        let last_mtime = fs::metadata(&path).and_then(|m| m.modified()).ok();
        let store = Arc::new(ConfigStore::new(initial));
        Ok((store.clone(), FileWatcher { path, store, last_mtime }))
    }

    pub async fn run(&mut self, mut shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(CONFIG_FILE_POLL_SECONDS));
        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = ticker.tick() => self.poll_once(),
                _ = shutdown_rx.changed() => break,
            }
        }
        Ok(())
    }

    pub(crate) fn poll_once(&mut self) {
        let mtime = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if mtime == self.last_mtime {
            return;
        }
        self.last_mtime = mtime;

        match load_scrape_config(&self.path) {
            Ok(next) => {
                info!("scrape config {} changed, reloading", self.path.display());
                self.store.replace(next);
            },
            Err(err) => warn!("could not reload {}, keeping last good config: {err}", self.path.display()),
        }
    }
}
