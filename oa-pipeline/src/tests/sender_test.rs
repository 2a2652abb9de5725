use std::collections::BTreeMap;
use std::sync::{
    Arc,
    Mutex,
};

use mockall::Sequence;
use tokio::sync::{
    mpsc,
    watch,
};
use tracing_test::traced_test;

use super::*;
use crate::send::Sender;
use crate::transport::{
    OpenMx,
    OpenMxHelp,
    Pack,
};

fn test_result(target: &str, collection_time: i64, metric_count: usize) -> ConversionResult {
    let metrics = (0..metric_count)
        .map(|i| OpenMx {
            name: format!("metric_{i}"),
            value: i as f64,
            time: collection_time,
            labels: BTreeMap::from([("job".to_string(), "node".to_string())]),
        })
        .collect();

    ConversionResult {
        target: target.into(),
        collection_time,
        metrics,
        helps: vec![OpenMxHelp {
            name: "up".into(),
            help: "target up".into(),
            mx_type: "gauge".into(),
        }],
    }
}

fn test_sender(transport: MockTransport) -> Sender {
    let (_, processed_rx) = mpsc::channel(1);
    Sender::new(processed_rx, Arc::new(transport))
}

#[rstest(tokio::test)]
async fn test_help_pack_precedes_metric_pack() {
    let mut transport = MockTransport::new();
    transport.expect_security_master().returning(test_security_master);

    let mut seq = Sequence::new();
    transport
        .expect_send()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|_, pack, _| {
            matches!(pack, Pack::Help(help_pack)
                if help_pack.pcode == TEST_PCODE && help_pack.oid == TEST_OID && help_pack.records.len() == 1)
        })
        .returning(|_, _, _| Ok(()));
    transport
        .expect_send()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|_, pack, _| {
            matches!(pack, Pack::Mx(mx_pack)
                if mx_pack.pcode == TEST_PCODE && mx_pack.records.len() == 1 && mx_pack.records[0].name == "metric_0")
        })
        .returning(|_, _, _| Ok(()));

    let sender = test_sender(transport);
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    sender.handle_result(test_result("t1", 1000, 1), &mut stop_rx).await;
    assert_eq!(sender.last_send_time("t1"), Some(1000));
}

#[rstest(tokio::test)]
#[traced_test]
async fn test_duplicate_collection_time_warns_but_sends() {
    let mut transport = MockTransport::new();
    transport.expect_security_master().returning(test_security_master);
    // two results, two chunks each (help + metrics); the duplicate is NOT
    // suppressed
    transport.expect_send().times(4).returning(|_, _, _| Ok(()));

    let sender = test_sender(transport);
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    sender.handle_result(test_result("t1", 1000, 1), &mut stop_rx).await;
    assert!(!logs_contain("duplicate collection time"));

    sender.handle_result(test_result("t1", 1000, 1), &mut stop_rx).await;
    assert!(logs_contain("duplicate collection time"));
    assert_eq!(sender.last_send_time("t1"), Some(1000));
}

#[rstest(tokio::test)]
async fn test_last_send_time_tracks_newest() {
    let mut transport = MockTransport::new();
    transport.expect_security_master().returning(test_security_master);
    transport.expect_send().returning(|_, _, _| Ok(()));

    let sender = test_sender(transport);
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    sender.handle_result(test_result("t1", 1000, 1), &mut stop_rx).await;
    sender.handle_result(test_result("t1", 1000, 1), &mut stop_rx).await;
    sender.handle_result(test_result("t1", 2000, 1), &mut stop_rx).await;
    assert_eq!(sender.last_send_time("t1"), Some(2000));
}

// 2500 records at chunk size 1000 → 3 packs whose concatenation is the input
#[rstest(tokio::test)]
async fn test_chunking_preserves_order() {
    let chunks: Arc<Mutex<Vec<Vec<String>>>> = Default::default();
    let seen = chunks.clone();

    let mut transport = MockTransport::new();
    transport.expect_security_master().returning(test_security_master);
    transport.expect_send().returning(move |_, pack, _| {
        if let Pack::Mx(mx_pack) = pack {
            seen.lock().unwrap().push(mx_pack.records.iter().map(|r| r.name.clone()).collect());
        }
        Ok(())
    });

    let sender = test_sender(transport);
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    sender.handle_result(test_result("t1", 1000, 2500), &mut stop_rx).await;

    let chunks = chunks.lock().unwrap();
    assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![1000, 1000, 500]);

    let concatenated: Vec<String> = chunks.iter().flatten().cloned().collect();
    let expected: Vec<String> = (0..2500).map(|i| format!("metric_{i}")).collect();
    assert_eq!(concatenated, expected);
}

// Three attempts at 5s spacing, then the chunk is dropped
#[rstest(tokio::test)]
async fn test_retry_exhaustion_drops_chunk() {
    tokio::time::pause();
    let mut transport = MockTransport::new();
    transport.expect_security_master().returning(test_security_master);
    // help chunk: 3 failed attempts; metric chunk: 3 failed attempts
    transport.expect_send().times(6).returning(|_, _, _| Err(anyhow::anyhow!("collector unreachable")));

    let sender = test_sender(transport);
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    sender.handle_result(test_result("t1", 1000, 1), &mut stop_rx).await;
}

#[rstest(tokio::test)]
async fn test_retry_recovers_on_second_attempt() {
    tokio::time::pause();
    let mut transport = MockTransport::new();
    transport.expect_security_master().returning(test_security_master);

    let mut seq = Sequence::new();
    transport
        .expect_send()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Err(anyhow::anyhow!("transient")));
    // help retry succeeds, then the metric chunk goes through first try
    transport.expect_send().times(2).in_sequence(&mut seq).returning(|_, _, _| Ok(()));

    let sender = test_sender(transport);
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    sender.handle_result(test_result("t1", 1000, 1), &mut stop_rx).await;
}

// A shutdown signal cancels the retry wait instead of sleeping it out
#[rstest(tokio::test)]
async fn test_shutdown_cancels_retry_wait() {
    let mut transport = MockTransport::new();
    transport.expect_security_master().returning(test_security_master);
    // one failed attempt, then the pending stop aborts the whole result
    transport.expect_send().times(1).returning(|_, _, _| Err(anyhow::anyhow!("transient")));

    let sender = test_sender(transport);
    let (stop_tx, mut stop_rx) = watch::channel(false);
    stop_tx.send(true).unwrap();
    sender.handle_result(test_result("t1", 1000, 1), &mut stop_rx).await;
}

// PCODE/OID come from the security master at pack-build time, not from a
// snapshot taken earlier
#[rstest(tokio::test)]
async fn test_security_master_read_at_send_time() {
    let pcodes: Arc<Mutex<Vec<i64>>> = Default::default();
    let seen = pcodes.clone();

    let mut transport = MockTransport::new();
    let master_calls = Arc::new(Mutex::new(0));
    transport.expect_security_master().returning(move || {
        let mut calls = master_calls.lock().unwrap();
        *calls += 1;
        SecurityMaster { pcode: *calls, oid: TEST_OID }
    });
    transport.expect_send().returning(move |_, pack, _| {
        let pcode = match pack {
            Pack::Mx(p) => p.pcode,
            Pack::Help(p) => p.pcode,
        };
        seen.lock().unwrap().push(pcode);
        Ok(())
    });

    let sender = test_sender(transport);
    let (_stop_tx, mut stop_rx) = watch::channel(false);
    sender.handle_result(test_result("t1", 1000, 1), &mut stop_rx).await;
    sender.handle_result(test_result("t1", 2000, 1), &mut stop_rx).await;

    // every pack observed a fresh master read
    assert_eq!(*pcodes.lock().unwrap(), vec![1, 2, 3, 4]);
}

// The run loop drains the processed queue and acknowledges its stop signal
// by returning
#[rstest(tokio::test)]
async fn test_run_loop_and_stop() {
    let sent = Arc::new(Mutex::new(0));
    let seen = sent.clone();

    let mut transport = MockTransport::new();
    transport.expect_security_master().returning(test_security_master);
    transport.expect_send().returning(move |_, _, _| {
        *seen.lock().unwrap() += 1;
        Ok(())
    });

    let (processed_tx, processed_rx) = mpsc::channel(4);
    let mut sender = Sender::new(processed_rx, Arc::new(transport));
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move { sender.run(stop_rx).await });

    processed_tx.send(test_result("t1", 1000, 1)).await.unwrap();

    // wait for both chunks (help + metrics) to land before stopping
    for _ in 0..100 {
        if *sent.lock().unwrap() >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(*sent.lock().unwrap(), 2);

    stop_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}
