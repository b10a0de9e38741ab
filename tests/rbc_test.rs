pub mod utils;

use crate::utils::test_utils::{setup_network, setup_tracing, spawn_rbc_routers};
use std::time::Duration;
use stoffelmpc_agreement::agreement::{rbc::Bracha, ProtocolType, SessionId};
use tokio::time::timeout;

fn setup_parties(n: usize, f: usize) -> Vec<Bracha> {
    (0..n)
        .map(|i| Bracha::new(i, n, f).expect("valid parameters"))
        .collect()
}

#[tokio::test]
async fn test_bracha_rbc_basic() {
    setup_tracing();

    let n = 4;
    let f = 1;
    let payload = b"Hello, MPC!".to_vec();
    let session_id = SessionId::new(ProtocolType::Rbc, 0, 1);

    let parties = setup_parties(n, f);
    let (net, receivers) = setup_network(n);
    spawn_rbc_routers(&parties, receivers, net.clone());

    // Party 0 initiates broadcast
    parties[0]
        .init(payload.clone(), session_id, net.clone())
        .await
        .expect("init failed");

    // Check that all parties delivered and agreed on the output
    for rbc in &parties {
        let output = timeout(Duration::from_secs(20), rbc.wait_output(session_id))
            .await
            .unwrap_or_else(|_| panic!("party {} did not deliver", rbc.id));
        assert_eq!(output, payload, "Incorrect payload at party {}", rbc.id);
    }
}

#[tokio::test]
async fn test_bracha_rbc_multiple_sessions_different_leaders() {
    setup_tracing();

    let n = 4;
    let f = 1;
    let parties = setup_parties(n, f);
    let (net, receivers) = setup_network(n);
    spawn_rbc_routers(&parties, receivers, net.clone());

    let payloads: Vec<Vec<u8>> = (0..n).map(|i| vec![i as u8; 8]).collect();

    // Each party leads one session
    for (i, rbc) in parties.iter().enumerate() {
        let session_id = SessionId::new(ProtocolType::Rbc, i as u8, 2);
        rbc.init(payloads[i].clone(), session_id, net.clone())
            .await
            .expect("init failed");
    }

    for rbc in &parties {
        for i in 0..n {
            let session_id = SessionId::new(ProtocolType::Rbc, i as u8, 2);
            let output = timeout(Duration::from_secs(20), rbc.wait_output(session_id))
                .await
                .unwrap_or_else(|_| panic!("party {} missed session {}", rbc.id, i));
            assert_eq!(
                output, payloads[i],
                "Incorrect payload at party {} for session {}",
                rbc.id, i
            );
        }
    }
}

#[tokio::test]
async fn test_bracha_rbc_with_crash_faulty_minority() {
    setup_tracing();

    let n = 7;
    let f = 2;
    let payload = b"crash fault test".to_vec();
    let session_id = SessionId::new(ProtocolType::Rbc, 2, 3);

    let parties = setup_parties(n, f);
    let (net, receivers) = setup_network(n);

    // Simulate f crash-faulty nodes by neither spawning them nor draining
    // their inbound channels.
    let honest = &parties[f..];
    let honest_receivers = receivers.into_iter().skip(f).collect::<Vec<_>>();
    spawn_rbc_routers(honest, honest_receivers, net.clone());

    // One honest party initiates the broadcast
    honest[0]
        .init(payload.clone(), session_id, net.clone())
        .await
        .expect("init failed");

    for rbc in honest {
        let output = timeout(Duration::from_secs(20), rbc.wait_output(session_id))
            .await
            .unwrap_or_else(|_| panic!("party {} did not deliver", rbc.id));
        assert_eq!(output, payload, "Incorrect payload at party {}", rbc.id);
    }
}
