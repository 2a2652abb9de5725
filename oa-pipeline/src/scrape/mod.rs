mod client;
mod scheduler;

use std::collections::{
    HashMap,
    HashSet,
};
use std::sync::{
    Arc,
    Mutex,
    RwLock,
};

use oa_core::config::{
    ConfigStore,
    RelabelConfig,
};
use oa_core::k8s::ClusterCache;
use oa_core::prelude::*;
use tokio::sync::{
    mpsc,
    watch,
    Semaphore,
};
use tokio::task::JoinHandle;
use tracing::*;

pub(crate) use self::scheduler::TargetScheduler;
use crate::target::{
    Target,
    TargetRegistry,
};

// One completed HTTP fetch, headed for the processor
#[derive(Clone, Debug)]
pub struct ScrapeRawData {
    pub target: String,
    pub body: String,
    pub collection_time: i64,
    pub metric_relabel_configs: Vec<RelabelConfig>,
    pub node_name: Option<String>,
    pub add_node_label: bool,
}

pub type RawSender = mpsc::Sender<ScrapeRawData>;
pub type RawReceiver = mpsc::Receiver<ScrapeRawData>;

pub(crate) struct SchedulerHandle {
    target: Arc<RwLock<Target>>,
    stop_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,

    // held so the task isn't detached entirely; the scheduler acks stops via
    // done_rx rather than through this handle
    _task: JoinHandle<()>,
}

impl SchedulerHandle {
    fn update_target(&self, target: Target) {
        *self.target.write().unwrap() = target;
    }

    fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn wait_stopped(done_rx: &mut watch::Receiver<bool>) {
        while !*done_rx.borrow() {
            if done_rx.changed().await.is_err() {
                break;
            }
        }
    }
}

// Owns one TargetScheduler per ready target.  The reconciliation tick keeps
// the scheduler map in sync with discovery's view of the world.
pub struct ScraperManager {
    config_store: Arc<ConfigStore>,
    registry: Arc<TargetRegistry>,
    cache: Option<Arc<ClusterCache>>,
    raw_tx: RawSender,
    schedulers: Mutex<HashMap<String, SchedulerHandle>>,

    // caps in-flight scrapes across all schedulers; None when
    // maxConcurrency is 0 (auto, uncapped)
    limiter: Option<Arc<Semaphore>>,
}

impl ScraperManager {
    pub fn new(
        config_store: Arc<ConfigStore>,
        registry: Arc<TargetRegistry>,
        cache: Option<Arc<ClusterCache>>,
        raw_tx: RawSender,
    ) -> Arc<ScraperManager> {
        let limiter = match config_store.max_concurrency() {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        Arc::new(ScraperManager {
            config_store,
            registry,
            cache,
            raw_tx,
            schedulers: Mutex::new(HashMap::new()),
            limiter,
        })
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> EmptyResult {
        while !*shutdown_rx.borrow() {
            self.reconcile_schedulers().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config_store.scraping_interval()) => (),
                _ = shutdown_rx.changed() => break,
            }
        }
        self.stop_all().await;
        Ok(())
    }

    pub async fn reconcile_schedulers(&self) {
        let ready: HashMap<String, Target> =
            self.registry.ready_targets().into_iter().map(|t| (t.id.clone(), t)).collect();

        for (id, target) in &ready {
            if !self.start_target_scheduler(target.clone()) {
                // Already scheduled: push the fresh metadata so relabel-config
                // changes take effect on the next tick without a restart.
                if let Some(handle) = self.schedulers.lock().unwrap().get(id) {
                    handle.update_target(target.clone());
                }
            }
        }

        let stale: Vec<String> = {
            let schedulers = self.schedulers.lock().unwrap();
            schedulers.keys().filter(|id| !ready.contains_key(*id)).cloned().collect()
        };
        for id in stale {
            self.stop_scheduler(&id).await;
            self.registry.remove(&id);
        }
    }

    // Creating a scheduler is atomic under the scheduler mutex: concurrent
    // calls for the same target id serialize here, and whoever loses the race
    // finds the id already present and backs off.  Without this, the same
    // target would be scraped twice at identical timestamps.
    pub fn start_target_scheduler(&self, target: Target) -> bool {
        let mut schedulers = self.schedulers.lock().unwrap();
        if schedulers.contains_key(&target.id) {
            return false;
        }

        let id = target.id.clone();
        debug!("starting scheduler for {id}");

        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let shared = Arc::new(RwLock::new(target));
        let scheduler = TargetScheduler::new(
            shared.clone(),
            self.config_store.clone(),
            self.cache.clone(),
            self.raw_tx.clone(),
            self.limiter.clone(),
        );
        let task = tokio::spawn(scheduler.run(stop_rx, done_tx));

        schedulers.insert(id, SchedulerHandle { target: shared, stop_tx, done_rx, _task: task });
        true
    }

    // Request stop, wait for the ack, and only then drop the map entry; the
    // id stays claimed until the old scheduler is really gone.
    async fn stop_scheduler(&self, id: &str) {
        let mut done_rx = {
            let schedulers = self.schedulers.lock().unwrap();
            let Some(handle) = schedulers.get(id) else { return };
            handle.request_stop();
            handle.done_rx.clone()
        };

        SchedulerHandle::wait_stopped(&mut done_rx).await;
        self.schedulers.lock().unwrap().remove(id);
        debug!("scheduler for {id} stopped");
    }

    async fn stop_all(&self) {
        let ids: Vec<String> = self.schedulers.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.stop_scheduler(&id).await;
        }
    }

    pub fn scheduled_ids(&self) -> HashSet<String> {
        self.schedulers.lock().unwrap().keys().cloned().collect()
    }

    pub fn scheduler_count(&self) -> usize {
        self.schedulers.lock().unwrap().len()
    }
}
