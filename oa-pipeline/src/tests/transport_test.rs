use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};
use tokio::io::{
    AsyncReadExt,
    AsyncWriteExt,
};
use tokio::net::TcpListener;

use super::*;
use crate::transport::{
    OpenMx,
    OpenMxPack,
    Pack,
    TcpTransport,
    Transport,
    CHANNEL_OPEN_MX,
};

// Wire mirrors of the transport's private hello/frame types
#[derive(Deserialize)]
struct HelloIn {
    license: String,
}

#[derive(Serialize)]
struct AckOut {
    pcode: i64,
    oid: i32,
}

#[derive(Deserialize)]
struct FrameIn {
    channel: u8,
    pack: Pack,
}

async fn read_frame(sock: &mut tokio::net::TcpStream) -> Vec<u8> {
    let len = sock.read_u32().await.unwrap();
    let mut buf = vec![0; len as usize];
    sock.read_exact(&mut buf).await.unwrap();
    buf
}

async fn write_frame(sock: &mut tokio::net::TcpStream, payload: &[u8]) {
    sock.write_u32(payload.len() as u32).await.unwrap();
    sock.write_all(payload).await.unwrap();
}

// A stub collector: accept, check the license hello, hand out credentials,
// then capture one pack frame
async fn stub_collector(listener: TcpListener) -> (String, FrameIn) {
    let (mut sock, _) = listener.accept().await.unwrap();

    let hello: HelloIn = rmp_serde::from_slice(&read_frame(&mut sock).await).unwrap();
    let ack = rmp_serde::to_vec_named(&AckOut { pcode: TEST_PCODE, oid: TEST_OID }).unwrap();
    write_frame(&mut sock, &ack).await;

    let frame: FrameIn = rmp_serde::from_slice(&read_frame(&mut sock).await).unwrap();
    (hello.license, frame)
}

#[rstest(tokio::test)]
async fn test_handshake_populates_security_master_and_frames_packs() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let collector = tokio::spawn(stub_collector(listener));

    let transport = TcpTransport::new("the-license".into(), vec!["127.0.0.1".into()], port);
    // nothing cached before the first send
    assert_eq!(transport.security_master().pcode, 0);

    let pack = Pack::Mx(OpenMxPack {
        pcode: TEST_PCODE,
        oid: TEST_OID,
        time: 1700000000000,
        records: vec![OpenMx {
            name: "up".into(),
            value: 1.0,
            time: 1700000000000,
            labels: BTreeMap::from([("job".to_string(), "node".to_string())]),
        }],
    });
    transport.send(CHANNEL_OPEN_MX, pack.clone(), true).await.unwrap();

    let master = transport.security_master();
    assert_eq!(master.pcode, TEST_PCODE);
    assert_eq!(master.oid, TEST_OID);

    let (license, frame) = collector.await.unwrap();
    assert_eq!(license, "the-license");
    assert_eq!(frame.channel, CHANNEL_OPEN_MX);
    assert_eq!(frame.pack, pack);
}

#[rstest(tokio::test)]
async fn test_send_fails_with_no_collector() {
    // nothing is listening here
    let transport = TcpTransport::new("lic".into(), vec!["127.0.0.1".into()], 1);
    let pack = Pack::Mx(OpenMxPack { pcode: 0, oid: 0, time: 0, records: vec![] });
    assert!(transport.send(CHANNEL_OPEN_MX, pack, false).await.is_err());
}

#[rstest(tokio::test)]
async fn test_send_fails_with_empty_host_list() {
    let transport = TcpTransport::new("lic".into(), vec![], 6600);
    let pack = Pack::Mx(OpenMxPack { pcode: 0, oid: 0, time: 0, records: vec![] });
    assert!(transport.send(CHANNEL_OPEN_MX, pack, false).await.is_err());
}
