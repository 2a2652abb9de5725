use std::collections::BTreeMap;
use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use oa_core::errors::*;
use serde::{
    Deserialize,
    Serialize,
};
use tokio::io::{
    AsyncReadExt,
    AsyncWriteExt,
};
use tokio::net::TcpStream;
use tracing::*;

// Wire channels understood by the collector
pub const CHANNEL_OPEN_MX: u8 = 40;
pub const CHANNEL_OPEN_MX_HELP: u8 = 41;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OpenMx {
    pub name: String,
    pub value: f64,
    pub time: i64,
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OpenMxHelp {
    pub name: String,
    pub help: String,
    #[serde(rename = "type")]
    pub mx_type: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OpenMxPack {
    pub pcode: i64,
    pub oid: i32,
    pub time: i64,
    pub records: Vec<OpenMx>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OpenMxHelpPack {
    pub pcode: i64,
    pub oid: i32,
    pub time: i64,
    pub records: Vec<OpenMxHelp>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Pack {
    Mx(OpenMxPack),
    Help(OpenMxHelpPack),
}

// Credentials handed out by the collector after the license hello.  Zero
// values mean the handshake hasn't completed; pack builders must read this at
// send time, never cache it.
#[derive(Clone, Copy, Debug, Default)]
pub struct SecurityMaster {
    pub pcode: i64,
    pub oid: i32,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn security_master(&self) -> SecurityMaster;
    async fn send(&self, channel: u8, pack: Pack, flush: bool) -> EmptyResult;
}

#[derive(Serialize)]
struct Hello<'a> {
    license: &'a str,
}

#[derive(Deserialize)]
struct HelloAck {
    pcode: i64,
    oid: i32,
}

#[derive(Serialize)]
struct Frame {
    channel: u8,
    pack: Pack,
}

// MessagePack frames with a u32 length prefix over plain TCP.  Hosts rotate
// on connection failure; the license hello on each new connection refreshes
// the security master.
pub struct TcpTransport {
    license: String,
    hosts: Vec<String>,
    port: u16,
    master: RwLock<SecurityMaster>,
    conn: tokio::sync::Mutex<Option<TcpStream>>,
    next_host: AtomicUsize,
}

impl TcpTransport {
    pub fn new(license: String, hosts: Vec<String>, port: u16) -> TcpTransport {
        TcpTransport {
            license,
            hosts,
            port,
            master: RwLock::new(SecurityMaster::default()),
            conn: tokio::sync::Mutex::new(None),
            next_host: AtomicUsize::new(0),
        }
    }

    async fn connect(&self) -> anyhow::Result<TcpStream> {
        ensure!(!self.hosts.is_empty(), "no collector hosts configured");

        let idx = self.next_host.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        let addr = format!("{}:{}", self.hosts[idx], self.port);
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await??;

        let hello = rmp_serde::to_vec_named(&Hello { license: &self.license })?;
        write_frame(&mut stream, &hello).await?;
        let ack: HelloAck = rmp_serde::from_slice(&read_frame(&mut stream).await?)?;

        *self.master.write().unwrap() = SecurityMaster { pcode: ack.pcode, oid: ack.oid };
        info!("connected to collector {addr}, pcode={} oid={}", ack.pcode, ack.oid);
        Ok(stream)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn security_master(&self) -> SecurityMaster {
        *self.master.read().unwrap()
    }

    async fn send(&self, channel: u8, pack: Pack, flush: bool) -> EmptyResult {
        let encoded = rmp_serde::to_vec_named(&Frame { channel, pack })?;

        let mut conn = self.conn.lock().await;
        if conn.is_none() {
            *conn = Some(self.connect().await?);
        }

        let stream = conn.as_mut().unwrap();
        let result = async {
            write_frame(stream, &encoded).await?;
            if flush {
                stream.flush().await?;
            }
            Ok(())
        }
        .await;

        // A dead connection gets dropped so the retry path reconnects against
        // the next host in the rotation.
        if result.is_err() {
            *conn = None;
        }
        result
    }
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> EmptyResult {
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let len = stream.read_u32().await?;
    ensure!(len <= MAX_FRAME_BYTES, "oversized frame from collector: {len} bytes");
    let mut payload = vec![0; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use mockall::mock;

    use super::*;

    mock! {
        pub Transport {}

        #[async_trait]
        impl Transport for Transport {
            fn security_master(&self) -> SecurityMaster;
            async fn send(&self, channel: u8, pack: Pack, flush: bool) -> EmptyResult;
        }
    }
}
