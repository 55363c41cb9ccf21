//! Property test for the missing-check decision rule: a hash is echoed as
//! wanted iff it is absent locally or held strictly older than advertised.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use ssync_engine::{Receiver, SyncRequest};
use ssync_store::{InMemoryStore, PartitionRef, PolicyRegistry, Timestamp};
use ssync_wire::HeaderMap;

use crate::harness::{run_session, test_config};

fn object_name(idx: usize) -> String {
    format!("/a/c/object-{idx}")
}

/// Drive one receiver session and return the echoed wanted hashes in order.
async fn echoed_hashes(
    local: &BTreeMap<usize, u64>,
    advertised: &[(usize, u64, bool)],
) -> Vec<String> {
    let store = InMemoryStore::new();
    let part = PartitionRef::new("sda1", "1", 0);
    for (&idx, &secs) in local {
        store.put_object(
            &part,
            None,
            &object_name(idx),
            Timestamp::from_secs(secs),
            HeaderMap::new(),
            "x",
        );
    }

    let mut input = String::from(":MISSING_CHECK: START\r\n");
    for &(idx, secs, extra) in advertised {
        let hash = InMemoryStore::hash_name(&object_name(idx));
        let ts = Timestamp::from_secs(secs);
        if extra {
            input.push_str(&format!("{hash} {ts} future-proof tokens\r\n"));
        } else {
            input.push_str(&format!("{hash} {ts}\r\n"));
        }
    }
    input.push_str(":MISSING_CHECK: END\r\n:UPDATES: START\r\n:UPDATES: END\r\n");

    let rx = Receiver::new(
        Arc::new(store),
        Arc::new(PolicyRegistry::default()),
        test_config(),
    );
    let (result, lines) = run_session(&rx, SyncRequest::new("/sda1/1"), input.as_bytes()).await;
    assert!(result.unwrap().is_success());

    // reply lines between the missing-check markers are the wanted hashes
    let end = lines
        .iter()
        .position(|l| l == ":MISSING_CHECK: END")
        .expect("reply end marker");
    lines[1..end].to_vec()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_wanted_iff_absent_or_strictly_older(
        local in prop::collection::btree_map(0..6usize, 1u64..1000, 0..6),
        advertised in prop::collection::vec((0..6usize, 1u64..1000, any::<bool>()), 0..12),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let echoed = rt.block_on(echoed_hashes(&local, &advertised));

        let expected: Vec<String> = advertised
            .iter()
            .filter(|(idx, secs, _)| local.get(idx).map_or(true, |held| held < secs))
            .map(|(idx, _, _)| InMemoryStore::hash_name(&object_name(*idx)))
            .collect();

        prop_assert_eq!(echoed, expected);
    }
}
