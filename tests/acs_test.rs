pub mod utils;

use crate::utils::test_utils::{setup_keys, setup_network, setup_tracing, spawn_acs_routers};
use std::time::Duration;
use stoffelmpc_agreement::agreement::{common_subset::CommonSubset, FaultPolicy};
use tokio::time::timeout;

fn setup_nodes(n: usize, f: usize, instance_id: u32) -> Vec<CommonSubset> {
    let (pk, sks) = setup_keys(n, f);
    sks.into_iter()
        .enumerate()
        .map(|(i, sk)| {
            CommonSubset::new(i, n, f, instance_id, pk.clone(), sk, FaultPolicy::Lenient)
                .expect("valid parameters")
        })
        .collect()
}

/// Each party proposes its own id as the value of the slot it leads.
fn proposal(id: usize) -> Vec<u8> {
    vec![id as u8]
}

#[tokio::test]
async fn test_common_subset_all_honest() {
    setup_tracing();

    let n = 4;
    let f = 1;
    let nodes = setup_nodes(n, f, 1);
    let (net, receivers) = setup_network(n);
    spawn_acs_routers(&nodes, receivers, net.clone());

    let mut handles = Vec::new();
    for node in &nodes {
        let node = node.clone();
        let net = net.clone();
        handles.push(tokio::spawn(
            async move { node.run(proposal(node.id), net).await },
        ));
    }

    let mut results = Vec::new();
    for handle in handles {
        let result = timeout(Duration::from_secs(120), handle)
            .await
            .expect("common subset timed out")
            .expect("task panicked")
            .expect("common subset failed");
        results.push(result);
    }

    for result in &results {
        assert_eq!(result.len(), n);
        // The subset always contains at least n - f slots.
        assert!(result.iter().filter(|slot| slot.is_some()).count() >= n - f);
        // Every included slot carries its proposer's value.
        for (j, slot) in result.iter().enumerate() {
            if let Some(value) = slot {
                assert_eq!(value, &proposal(j), "slot {} has a foreign value", j);
            }
        }
    }
    // All parties agree on the whole result vector.
    for result in &results[1..] {
        assert_eq!(&results[0], result);
    }
}

#[tokio::test]
async fn test_common_subset_with_silent_party() {
    setup_tracing();

    let n = 4;
    let f = 1;
    let nodes = setup_nodes(n, f, 2);
    let (net, mut receivers) = setup_network(n);

    // Party 3 crashed before proposing: its inbound channel is dropped and
    // it never runs.
    receivers.truncate(n - 1);
    let active = &nodes[..n - 1];
    spawn_acs_routers(active, receivers, net.clone());

    let mut handles = Vec::new();
    for node in active {
        let node = node.clone();
        let net = net.clone();
        handles.push(tokio::spawn(
            async move { node.run(proposal(node.id), net).await },
        ));
    }

    let mut results = Vec::new();
    for handle in handles {
        let result = timeout(Duration::from_secs(120), handle)
            .await
            .expect("common subset timed out")
            .expect("task panicked")
            .expect("common subset failed");
        results.push(result);
    }

    for result in &results {
        assert!(result.iter().filter(|slot| slot.is_some()).count() >= n - f);
        // The crashed party never broadcast, so its slot must be excluded.
        assert!(result[n - 1].is_none());
        for (j, slot) in result.iter().enumerate() {
            if let Some(value) = slot {
                assert_eq!(value, &proposal(j));
            }
        }
    }
    for result in &results[1..] {
        assert_eq!(&results[0], result);
    }
}
