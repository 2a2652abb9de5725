mod parser;
mod relabel;

use oa_core::prelude::*;
pub use relabel::{
    hashmod,
    RelabelEngine,
};
use tokio::sync::{
    mpsc,
    watch,
};
use tracing::*;

use self::parser::parse_exposition;
use crate::scrape::{
    RawReceiver,
    ScrapeRawData,
};
use crate::transport::{
    OpenMx,
    OpenMxHelp,
};

const NAME_LABEL: &str = "__name__";
const META_LABEL_PREFIX: &str = "__";

// The unit of transfer from processor to sender: everything one scrape
// produced, post-relabel.
#[derive(Clone, Debug)]
pub struct ConversionResult {
    pub target: String,
    pub collection_time: i64,
    pub metrics: Vec<OpenMx>,
    pub helps: Vec<OpenMxHelp>,
}

pub type ProcessedSender = mpsc::Sender<ConversionResult>;
pub type ProcessedReceiver = mpsc::Receiver<ConversionResult>;

// Single consumer of the raw queue: parse, relabel, emit.  Bad input never
// blocks the pipeline; at worst it discards a line or a rule.
pub struct Processor {
    raw_rx: RawReceiver,
    processed_tx: ProcessedSender,
    engine: RelabelEngine,
}

impl Processor {
    pub fn new(raw_rx: RawReceiver, processed_tx: ProcessedSender) -> Processor {
        Processor {
            raw_rx,
            processed_tx,
            engine: RelabelEngine::new(),
        }
    }

    pub async fn run(&mut self, mut shutdown_rx: watch::Receiver<bool>) -> EmptyResult {
        while !*shutdown_rx.borrow() {
            tokio::select! {
                maybe_raw = self.raw_rx.recv() => match maybe_raw {
                    Some(raw) => {
                        let result = self.convert(raw);
                        self.processed_tx.send(result).await?;
                    },
                    None => break,
                },
                _ = shutdown_rx.changed() => break,
            }
        }
        Ok(())
    }

    pub fn convert(&mut self, raw: ScrapeRawData) -> ConversionResult {
        let (samples, helps) = parse_exposition(&raw.body);

        let mut metrics = vec![];
        for mut sample in samples {
            // NaN and the infinities are dropped here rather than forwarded
            // as sentinels
            if !sample.value.is_finite() {
                debug!("dropping non-finite sample {} from {}", sample.name, raw.target);
                continue;
            }

            // Surface the metric name to the pipeline the way Prometheus
            // does, so rules can match and rewrite __name__
            sample.labels.insert(NAME_LABEL.into(), sample.name.clone());
            if !self.engine.apply(&raw.metric_relabel_configs, &mut sample.labels) {
                continue;
            }
            let name = sample.labels.get(NAME_LABEL).cloned().unwrap_or(sample.name);

            sample.labels.retain(|key, _| !key.starts_with(META_LABEL_PREFIX));

            if raw.add_node_label
                && let Some(node) = &raw.node_name
            {
                sample.labels.insert("node".into(), node.clone());
            }

            metrics.push(OpenMx {
                name,
                value: sample.value,
                time: sample.timestamp.unwrap_or(raw.collection_time),
                labels: sample.labels,
            });
        }

        ConversionResult {
            target: raw.target,
            collection_time: raw.collection_time,
            metrics,
            helps,
        }
    }
}
