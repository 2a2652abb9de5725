use std::sync::{
    Arc,
    RwLock,
};
use std::time::Duration;

use oa_core::config::{
    parse_interval,
    AdaptiveTimeout,
    ConfigStore,
    TlsConfig,
};
use oa_core::errors::*;
use oa_core::k8s::ClusterCache;
use oa_core::prelude::*;
use tokio::sync::{
    watch,
    Semaphore,
};
use tracing::*;

use super::client::{
    build_scrape_client,
    resolve_basic_auth,
    service_account_token,
};
use super::{
    RawSender,
    ScrapeRawData,
};
use crate::now_ms;
use crate::target::Target;

// Consecutive-failure tracking for the adaptive timeout policy.  Once the
// failure count reaches the threshold, the effective timeout grows by the
// configured multiplier (capped at 5x base); the first success snaps it back.
pub(crate) struct AdaptiveState {
    base: Duration,
    current: Duration,
    failures: u32,
    policy: Option<AdaptiveTimeout>,
}

impl AdaptiveState {
    pub(crate) fn new(base: Duration, policy: Option<AdaptiveTimeout>) -> AdaptiveState {
        AdaptiveState { base, current: base, failures: 0, policy }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.current
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn note_success(&mut self) {
        self.failures = 0;
        self.current = self.base;
    }

    pub(crate) fn note_failure(&mut self) {
        self.failures += 1;
        let Some(policy) = self.policy else { return };
        if !policy.enabled || policy.failure_threshold == 0 || self.failures < policy.failure_threshold {
            return;
        }

        let ceiling = self.base * ADAPTIVE_TIMEOUT_CEILING_FACTOR;
        self.current = self.current.mul_f64(policy.multiplier.max(1.0)).min(ceiling);
    }
}

// A per-target worker: scrape, hand the payload downstream, sleep, repeat.
// The manager pushes target updates through the shared RwLock; they take
// effect on the next pass.
pub(crate) struct TargetScheduler {
    target: Arc<RwLock<Target>>,
    config_store: Arc<ConfigStore>,
    cache: Option<Arc<ClusterCache>>,
    raw_tx: RawSender,
    adaptive: AdaptiveState,
    last_collection_time: i64,
    http: Option<(reqwest::Client, Option<TlsConfig>)>,
    limiter: Option<Arc<Semaphore>>,
}

impl TargetScheduler {
    pub(crate) fn new(
        target: Arc<RwLock<Target>>,
        config_store: Arc<ConfigStore>,
        cache: Option<Arc<ClusterCache>>,
        raw_tx: RawSender,
        limiter: Option<Arc<Semaphore>>,
    ) -> TargetScheduler {
        let (base_timeout, policy) = {
            let t = target.read().unwrap();
            let base =
                Duration::from_secs(parse_interval(&t.metadata.endpoint.timeout, DEFAULT_SCRAPE_TIMEOUT_SECONDS));
            (base, t.metadata.endpoint.adaptive_timeout)
        };

        TargetScheduler {
            target,
            config_store,
            cache,
            raw_tx,
            adaptive: AdaptiveState::new(base_timeout, policy),
            last_collection_time: 0,
            http: None,
            limiter,
        }
    }

    pub(crate) async fn run(mut self, mut stop_rx: watch::Receiver<bool>, done_tx: watch::Sender<bool>) {
        loop {
            if let Err(err) = self.scrape_once().await {
                let url = self.target.read().unwrap().url.clone();
                debug!("scrape of {url} failed ({} consecutive): {err}", self.adaptive.failures());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.effective_interval()) => (),
                _ = stop_rx.changed() => break,
            }
        }
        let _ = done_tx.send(true);
    }

    // Endpoint interval, clamped to the configured floor
    fn effective_interval(&self) -> Duration {
        let raw = self.target.read().unwrap().metadata.endpoint.interval.clone();
        let interval = Duration::from_secs(parse_interval(&raw, DEFAULT_SCRAPE_INTERVAL_SECONDS));
        interval.max(self.config_store.minimum_interval())
    }

    async fn scrape_once(&mut self) -> EmptyResult {
        let target = self.target.read().unwrap().clone();

        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.clone().acquire_owned().await?),
            None => None,
        };
        let collection_time = self.next_collection_time();

        let response = match self.fetch(&target).await {
            Ok(body) => body,
            Err(err) => {
                self.adaptive.note_failure();
                self.target.write().unwrap().retry_count += 1;
                return Err(err);
            },
        };
        self.adaptive.note_success();
        self.target.write().unwrap().retry_count = 0;

        // Intentionally a blocking send: a full raw queue is how the
        // processor pushes back on scraping.
        self.raw_tx
            .send(ScrapeRawData {
                target: target.url.clone(),
                body: response,
                collection_time,
                metric_relabel_configs: target.metadata.endpoint.metric_relabel_configs.clone(),
                node_name: target.metadata.node_name.clone(),
                add_node_label: target.metadata.endpoint.add_node_label,
            })
            .await?;
        Ok(())
    }

    async fn fetch(&mut self, target: &Target) -> anyhow::Result<String> {
        let client = self.client_for(target)?.clone();

        let mut request = client
            .get(&target.url)
            .header("Accept", "application/json")
            .timeout(self.adaptive.timeout());

        if let Some(token) = service_account_token() {
            request = request.bearer_auth(token);
        }
        if let Some((username, password)) =
            resolve_basic_auth(&target.metadata.endpoint, &target.metadata.namespace, self.cache.as_deref())
        {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} returned status {status}", target.url);
        }
        Ok(response.text().await?)
    }

    // The client is rebuilt only when the endpoint's TLS settings change
    fn client_for(&mut self, target: &Target) -> anyhow::Result<&reqwest::Client> {
        let tls = target.metadata.endpoint.tls_config.clone();
        let stale = match &self.http {
            Some((_, cached_tls)) => *cached_tls != tls,
            None => true,
        };
        if stale {
            let client = build_scrape_client(tls.as_ref())?;
            self.http = Some((client, tls));
        }
        Ok(&self.http.as_ref().unwrap().0)
    }

    // collectionTime is assigned at request start and must be strictly
    // increasing per target, even if the clock stalls inside one millisecond
    fn next_collection_time(&mut self) -> i64 {
        let now = now_ms().max(self.last_collection_time + 1);
        self.last_collection_time = now;
        now
    }
}
