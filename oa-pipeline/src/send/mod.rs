use std::collections::HashMap;
use std::sync::{
    Arc,
    Mutex,
};
use std::time::Duration;

use oa_core::prelude::*;
use tokio::sync::watch;
use tracing::*;

use crate::now_ms;
use crate::process::{
    ConversionResult,
    ProcessedReceiver,
};
use crate::transport::{
    OpenMxHelpPack,
    OpenMxPack,
    Pack,
    Transport,
    CHANNEL_OPEN_MX,
    CHANNEL_OPEN_MX_HELP,
};

// Single consumer of the processed queue: chunk, pack, ship.  Credentials
// come from the transport's security master at pack-build time, never from a
// cached copy.
pub struct Sender {
    processed_rx: ProcessedReceiver,
    transport: Arc<dyn Transport>,
    last_send_time: Mutex<HashMap<String, i64>>,
}

impl Sender {
    pub fn new(processed_rx: ProcessedReceiver, transport: Arc<dyn Transport>) -> Sender {
        Sender {
            processed_rx,
            transport,
            last_send_time: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&mut self, mut stop_rx: watch::Receiver<bool>) -> EmptyResult {
        while !*stop_rx.borrow() {
            tokio::select! {
                maybe_result = self.processed_rx.recv() => match maybe_result {
                    Some(result) => self.handle_result(result, &mut stop_rx).await,
                    None => break,
                },
                _ = stop_rx.changed() => break,
            }
        }
        Ok(())
    }

    pub async fn handle_result(&self, result: ConversionResult, stop_rx: &mut watch::Receiver<bool>) {
        self.note_collection_time(&result);

        // Help packs go out first so the backend sees metadata before samples
        for chunk in chunked(&result.helps, PACK_CHUNK_SIZE) {
            let master = self.transport.security_master();
            let pack = Pack::Help(OpenMxHelpPack {
                pcode: master.pcode,
                oid: master.oid,
                time: now_ms(),
                records: chunk,
            });
            if !self.send_with_retry(CHANNEL_OPEN_MX_HELP, pack, stop_rx).await {
                return;
            }
        }

        for chunk in chunked(&result.metrics, PACK_CHUNK_SIZE) {
            let master = self.transport.security_master();
            let pack = Pack::Mx(OpenMxPack {
                pcode: master.pcode,
                oid: master.oid,
                time: now_ms(),
                records: chunk,
            });
            if !self.send_with_retry(CHANNEL_OPEN_MX, pack, stop_rx).await {
                return;
            }
        }
    }

    // A repeated (target, collectionTime) means the upstream scheduler fired
    // twice at the same instant; the operator needs to see that.  Diagnostic
    // only, the result still goes out.
    fn note_collection_time(&self, result: &ConversionResult) {
        let mut last = self.last_send_time.lock().unwrap();
        if last.get(&result.target) == Some(&result.collection_time) {
            warn!(
                "duplicate collection time {} for target {}, upstream scheduler may have fired twice",
                result.collection_time, result.target
            );
        }
        last.insert(result.target.clone(), result.collection_time);
    }

    pub fn last_send_time(&self, target: &str) -> Option<i64> {
        self.last_send_time.lock().unwrap().get(target).copied()
    }

    // Returns false once shutdown has been requested; the caller abandons
    // the rest of the result.
    async fn send_with_retry(&self, channel: u8, pack: Pack, stop_rx: &mut watch::Receiver<bool>) -> bool {
        for attempt in 1..=SEND_RETRY_COUNT {
            match self.transport.send(channel, pack.clone(), true).await {
                Ok(()) => return true,
                Err(err) => warn!("send attempt {attempt}/{SEND_RETRY_COUNT} failed: {err}"),
            }

            if attempt < SEND_RETRY_COUNT {
                if *stop_rx.borrow() {
                    info!("shutdown requested, abandoning retry");
                    return false;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(SEND_RETRY_DELAY_SECONDS)) => (),
                    _ = stop_rx.changed() => {
                        info!("shutdown requested, abandoning retry");
                        return false;
                    },
                }
            }
        }
        error!("dropping chunk after {SEND_RETRY_COUNT} failed attempts");
        true
    }
}

// Chunks of at most `size` records whose concatenation is the input, in order
pub fn chunked<T: Clone>(records: &[T], size: usize) -> Vec<Vec<T>> {
    records.chunks(size).map(|chunk| chunk.to_vec()).collect()
}
