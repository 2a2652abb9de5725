use std::future::Future;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::time::Duration;

use oa_core::conf::AgentConf;
use oa_core::config::{
    ConfigStore,
    FileWatcher,
};
use oa_core::k8s::ClusterCache;
use oa_core::prelude::*;
use oa_pipeline::discovery::ServiceDiscovery;
use oa_pipeline::process::Processor;
use oa_pipeline::scrape::ScraperManager;
use oa_pipeline::send::Sender;
use oa_pipeline::target::TargetRegistry;
use oa_pipeline::transport::Transport;
use tokio::sync::{
    mpsc,
    watch,
    Mutex,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::*;

// Boots every pipeline component as an independent supervised task and owns
// the shutdown machinery.  A task that dies (panic or error) restarts after
// 5s unless shutdown has been requested; a task that returns cleanly is done.
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    sender_stop_tx: watch::Sender<bool>,
    transport: Arc<dyn Transport>,
    started_at: Instant,
    running: Arc<AtomicBool>,
    sender_task: Option<JoinHandle<()>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn boot(
        conf: Arc<AgentConf>,
        config_store: Arc<ConfigStore>,
        mut file_watcher: Option<FileWatcher>,
        cache: Option<Arc<ClusterCache>>,
        transport: Arc<dyn Transport>,
    ) -> Supervisor {
        let (shutdown_tx, _) = watch::channel(false);
        let (sender_stop_tx, _) = watch::channel(false);

        let mut supervisor = Supervisor {
            shutdown_tx,
            sender_stop_tx,
            transport: transport.clone(),
            started_at: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            sender_task: None,
            tasks: vec![],
        };

        let (raw_tx, raw_rx) = mpsc::channel(RAW_QUEUE_CAPACITY);
        let (processed_tx, processed_rx) = mpsc::channel(PROCESSED_QUEUE_CAPACITY);

        let registry = Arc::new(TargetRegistry::new());
        let discovery = Arc::new(ServiceDiscovery::new(config_store.clone(), cache.clone(), registry.clone()));
        let manager = ScraperManager::new(config_store.clone(), registry, cache, raw_tx);
        let processor = Arc::new(Mutex::new(Processor::new(raw_rx, processed_tx)));
        let sender = Arc::new(Mutex::new(Sender::new(processed_rx, transport)));

        let shutdown = supervisor.shutdown_tx.clone();
        supervisor.spawn_supervised("conf-watcher", move || {
            let (conf, shutdown_rx) = (conf.clone(), shutdown.subscribe());
            async move { conf.watch(shutdown_rx).await }
        });

        if let Some(watcher) = file_watcher.take() {
            let watcher = Arc::new(Mutex::new(watcher));
            let shutdown = supervisor.shutdown_tx.clone();
            supervisor.spawn_supervised("config-watcher", move || {
                let (watcher, shutdown_rx) = (watcher.clone(), shutdown.subscribe());
                async move { watcher.lock().await.run(shutdown_rx).await }
            });
        }

        let shutdown = supervisor.shutdown_tx.clone();
        supervisor.spawn_supervised("discovery", move || {
            let (discovery, shutdown_rx) = (discovery.clone(), shutdown.subscribe());
            async move { discovery.run(shutdown_rx).await }
        });

        let shutdown = supervisor.shutdown_tx.clone();
        supervisor.spawn_supervised("scraper-manager", move || {
            let (manager, shutdown_rx) = (manager.clone(), shutdown.subscribe());
            async move { manager.run(shutdown_rx).await }
        });

        let shutdown = supervisor.shutdown_tx.clone();
        supervisor.spawn_supervised("processor", move || {
            let (processor, shutdown_rx) = (processor.clone(), shutdown.subscribe());
            async move { processor.lock().await.run(shutdown_rx).await }
        });

        // The sender listens on its own stop channel so shutdown can drain it
        // before everything else goes away
        let sender_stop = supervisor.sender_stop_tx.clone();
        let sender_task = supervisor.supervise("sender", move || {
            let (sender, stop_rx) = (sender.clone(), sender_stop.subscribe());
            async move { sender.lock().await.run(stop_rx).await }
        });
        supervisor.sender_task = Some(sender_task);

        supervisor
    }

    fn spawn_supervised<F, Fut>(&mut self, name: &'static str, factory: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = EmptyResult> + Send + 'static,
    {
        let handle = self.supervise(name, factory);
        self.tasks.push((name, handle));
    }

    fn supervise<F, Fut>(&self, name: &'static str, mut factory: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = EmptyResult> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                match tokio::spawn(factory()).await {
                    Ok(Ok(())) => {
                        info!("{name} exited cleanly");
                        break;
                    },
                    Ok(Err(err)) => error!("{name} failed: {err:?}"),
                    Err(join_err) => error!("{name} panicked: {join_err}"),
                }

                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(RESTART_DELAY_SECONDS)) => info!("restarting {name}"),
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }

    // Cooperative shutdown: the sender drains first so in-flight packs make
    // it out, then the broadcast wakes everything else.  30s cap, hard.
    pub async fn shutdown(mut self) {
        info!("shutdown requested");
        self.running.store(false, Ordering::SeqCst);

        let shutdown_sequence = async {
            let _ = self.sender_stop_tx.send(true);
            if let Some(sender_task) = self.sender_task.take() {
                let _ = sender_task.await;
                debug!("sender stopped");
            }

            let _ = self.shutdown_tx.send(true);
            for (name, task) in self.tasks.drain(..) {
                let _ = task.await;
                debug!("{name} stopped");
            }
        };

        if tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECONDS), shutdown_sequence)
            .await
            .is_err()
        {
            warn!("components still running after {SHUTDOWN_TIMEOUT_SECONDS}s, forcing exit");
        }
        info!("shutdown complete");
    }

    // Health probe: optimistic through the warm-up window, then gated on the
    // security master actually holding credentials.
    pub fn is_ok(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        if self.started_at.elapsed() < Duration::from_secs(WARMUP_WINDOW_SECONDS) {
            return true;
        }
        let master = self.transport.security_master();
        master.pcode != 0 && master.oid != 0
    }
}
