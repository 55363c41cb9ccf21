//! Full sender-to-receiver sessions over an in-process stream, with real
//! stores on both ends.

use std::sync::Arc;

use ssync_engine::{Receiver, Sender, SenderReport, SyncJob};
use ssync_store::{
    InMemoryStore, ObjectState, PartitionRef, PolicyRegistry, StoragePolicy, Timestamp,
};
use ssync_wire::HeaderMap;

use crate::harness::{init_tracing, test_config};

fn ts(raw: &str) -> Timestamp {
    raw.parse().unwrap()
}

async fn sync_once(
    sender: &Sender<InMemoryStore>,
    receiver: Arc<Receiver<InMemoryStore>>,
    job: &SyncJob,
) -> SenderReport {
    let (rx_stream, tx_stream) = tokio::io::duplex(1 << 20);
    let req = sender.request(job);
    let rx_task = tokio::spawn(async move { receiver.handle(req, rx_stream).await });
    let report = sender.sync(job, tx_stream, &[]).await.unwrap();
    let rx_report = rx_task.await.unwrap().unwrap();
    assert!(rx_report.is_success(), "receiver failed: {:?}", rx_report.error);
    report
}

#[tokio::test]
async fn test_divergent_replicas_converge_on_the_missing_object() {
    init_tracing();
    let part = PartitionRef::new("sda1", "1", 0);

    let tx_store = Arc::new(InMemoryStore::new());
    let mut headers = HeaderMap::new();
    headers.insert("X-Object-Meta-Color", "blue");
    tx_store.put_object(&part, None, "/a/c/o1", ts("1372800001.00000"), HeaderMap::new(), "one");
    tx_store.put_object(&part, None, "/a/c/o2", ts("1372800002.00000"), headers, "two");

    // receiver already holds o1 at the exact same version
    let rx_store = Arc::new(InMemoryStore::new());
    rx_store.put_object(&part, None, "/a/c/o1", ts("1372800001.00000"), HeaderMap::new(), "one");

    let receiver = Arc::new(Receiver::new(
        rx_store.clone(),
        Arc::new(PolicyRegistry::default()),
        test_config(),
    ));
    let sender = Sender::new(tx_store.clone(), test_config());
    let job = SyncJob::new("sda1", "1", 0);

    let report = sync_once(&sender, receiver.clone(), &job).await;
    assert_eq!(report.candidates, 2);
    assert_eq!(report.wanted, 1);
    assert_eq!(report.sent, 1);

    // o2 arrived with its body and metadata
    let obj = rx_store.object(&part, None, "/a/c/o2").expect("o2 replicated");
    match obj.state {
        ObjectState::Object { timestamp, headers, body } => {
            assert_eq!(timestamp, ts("1372800002.00000"));
            assert_eq!(&body[..], b"two");
            assert_eq!(headers.get("x-object-meta-color"), Some("blue"));
            assert_eq!(headers.get("content-length"), Some("3"));
        }
        other => panic!("expected live object, got {other:?}"),
    }

    // a second pass finds nothing left to transfer
    let report = sync_once(&sender, receiver, &job).await;
    assert_eq!(report.wanted, 0);
    assert_eq!(report.sent, 0);
}

#[tokio::test]
async fn test_deletion_replicates_as_a_tombstone() {
    let part = PartitionRef::new("sda1", "1", 0);

    let tx_store = Arc::new(InMemoryStore::new());
    tx_store.delete_object(&part, None, "/a/c/doomed", ts("1372800005.00000"));

    // receiver still has the older live copy
    let rx_store = Arc::new(InMemoryStore::new());
    rx_store.put_object(&part, None, "/a/c/doomed", ts("1372800001.00000"), HeaderMap::new(), "x");

    let receiver = Arc::new(Receiver::new(
        rx_store.clone(),
        Arc::new(PolicyRegistry::default()),
        test_config(),
    ));
    let sender = Sender::new(tx_store, test_config());
    let job = SyncJob::new("sda1", "1", 0);

    let report = sync_once(&sender, receiver, &job).await;
    assert_eq!(report.wanted, 1);
    assert_eq!(report.sent, 1);

    match rx_store.object(&part, None, "/a/c/doomed").unwrap().state {
        ObjectState::Tombstone { timestamp } => assert_eq!(timestamp, ts("1372800005.00000")),
        other => panic!("expected tombstone, got {other:?}"),
    }
}

#[tokio::test]
async fn test_newer_receiver_copy_is_left_alone() {
    let part = PartitionRef::new("sda1", "1", 0);

    let tx_store = Arc::new(InMemoryStore::new());
    tx_store.put_object(&part, None, "/a/c/o1", ts("1372800001.00000"), HeaderMap::new(), "old");

    let rx_store = Arc::new(InMemoryStore::new());
    rx_store.put_object(&part, None, "/a/c/o1", ts("1372800009.00000"), HeaderMap::new(), "new");

    let receiver = Arc::new(Receiver::new(
        rx_store.clone(),
        Arc::new(PolicyRegistry::default()),
        test_config(),
    ));
    let sender = Sender::new(tx_store, test_config());
    let job = SyncJob::new("sda1", "1", 0);

    let report = sync_once(&sender, receiver, &job).await;
    assert_eq!(report.wanted, 0);

    match rx_store.object(&part, None, "/a/c/o1").unwrap().state {
        ObjectState::Object { timestamp, body, .. } => {
            assert_eq!(timestamp, ts("1372800009.00000"));
            assert_eq!(&body[..], b"new");
        }
        other => panic!("expected live object, got {other:?}"),
    }
}

#[tokio::test]
async fn test_erasure_coded_session_stays_in_its_fragment_shard() {
    let registry = || {
        Arc::new(PolicyRegistry::new(vec![
            StoragePolicy::replicated(0),
            StoragePolicy::erasure_coded(1),
        ]))
    };
    let part = PartitionRef::new("sda1", "1", 1);

    let tx_store = Arc::new(InMemoryStore::new());
    tx_store.put_object(&part, Some(3), "/a/c/frag", ts("1372800001.00000"), HeaderMap::new(), "f3");

    let rx_store = Arc::new(InMemoryStore::new());
    let receiver = Arc::new(Receiver::new(rx_store.clone(), registry(), test_config()));
    let sender = Sender::new(tx_store, test_config());
    let job = SyncJob::new("sda1", "1", 1).with_frag_index(3);

    let report = sync_once(&sender, receiver, &job).await;
    assert_eq!(report.sent, 1);

    // landed in fragment 3's shard, nowhere else
    assert!(rx_store.object(&part, Some(3), "/a/c/frag").is_some());
    assert!(rx_store.object(&part, Some(4), "/a/c/frag").is_none());
    assert!(rx_store.object(&part, None, "/a/c/frag").is_none());
}
