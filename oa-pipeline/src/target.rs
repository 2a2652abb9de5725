use std::collections::{
    BTreeMap,
    HashMap,
    HashSet,
};
use std::sync::Mutex;

use oa_core::config::{
    EndpointConfig,
    MonitorKind,
};

use crate::now_ms;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetState {
    Ready,
    Pending,
    Error,
    Removed,
}

// A single scrape endpoint.  Identity is by id; discovery overwrites all the
// other fields on every reconciliation tick so that endpoint-config changes
// (relabel rules in particular) never outlive the config that produced them.
#[derive(Clone, Debug)]
pub struct Target {
    pub id: String,
    pub url: String,
    pub labels: BTreeMap<String, String>,
    pub metadata: TargetMetadata,
    pub state: TargetState,
    pub last_seen: i64,
    pub retry_count: u32,
}

#[derive(Clone, Debug)]
pub struct TargetMetadata {
    pub target_name: String,
    pub kind: MonitorKind,
    pub namespace: String,
    pub endpoint: EndpointConfig,
    pub node_name: Option<String>,
}

impl Target {
    pub fn new(id: String, url: String, labels: BTreeMap<String, String>, metadata: TargetMetadata, state: TargetState) -> Target {
        Target {
            id,
            url,
            labels,
            metadata,
            state,
            last_seen: now_ms(),
            retry_count: 0,
        }
    }
}

// The live set of discovered targets.  Schedulers hold read-only copies; the
// registry is the single owner.
#[derive(Default)]
pub struct TargetRegistry {
    targets: Mutex<HashMap<String, Target>>,
}

impl TargetRegistry {
    pub fn new() -> TargetRegistry {
        Default::default()
    }

    // Insert or overwrite; discovery calls this every tick for every matched
    // target so metadata always reflects the latest config.
    pub fn upsert(&self, mut target: Target) {
        target.last_seen = now_ms();
        self.targets.lock().unwrap().insert(target.id.clone(), target);
    }

    // Everything not seen this tick stops matching its config and moves to
    // Removed; the scraper manager tears its scheduler down on the next pass.
    pub fn sweep_unseen(&self, seen: &HashSet<String>) {
        for (id, target) in self.targets.lock().unwrap().iter_mut() {
            if !seen.contains(id) {
                target.state = TargetState::Removed;
            }
        }
    }

    pub fn ready_targets(&self) -> Vec<Target> {
        self.targets
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.state == TargetState::Ready)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Target> {
        self.targets.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.targets.lock().unwrap().remove(id);
    }

    pub fn len(&self) -> usize {
        self.targets.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.lock().unwrap().is_empty()
    }
}
