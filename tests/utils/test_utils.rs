use std::sync::Arc;
use stoffelmpc_agreement::agreement::{
    binary_agreement::BinaryAgreement,
    common_coin::{CommonCoin, Dealer},
    common_subset::CommonSubset,
    rbc::Bracha,
    WrappedMessage,
};
use stoffelmpc_agreement::net::fake_network::{FakeNetwork, FakeNetworkConfig};
use threshold_crypto::{PublicKeySet, SecretKeyShare};
use tokio::sync::mpsc::Receiver;
use tracing::warn;

pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

/// Sets up the shared in-process network and one inbound receiver per party.
pub fn setup_network(n: usize) -> (Arc<FakeNetwork>, Vec<Receiver<Vec<u8>>>) {
    let config = FakeNetworkConfig::new(500);
    let (network, receivers) = FakeNetwork::new(n, config);
    (Arc::new(network), receivers)
}

/// Generates the threshold key material for n parties tolerating f faults.
pub fn setup_keys(n: usize, f: usize) -> (PublicKeySet, Vec<SecretKeyShare>) {
    Dealer::new(n, f).deal()
}

/// Spawns a router per party feeding its inbound traffic into a standalone
/// coin instance.
pub fn spawn_coin_routers(coins: &[CommonCoin], receivers: Vec<Receiver<Vec<u8>>>) {
    for (coin, mut rx) in coins.iter().cloned().zip(receivers.into_iter()) {
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                let wrapped: WrappedMessage = match bincode::deserialize(&raw) {
                    Ok(m) => m,
                    Err(_) => {
                        warn!("Malformed or unrecognized message format.");
                        continue;
                    }
                };
                match wrapped {
                    WrappedMessage::Coin(msg) => {
                        if let Err(e) = coin.process(msg).await {
                            warn!(error = ?e, "Coin message processing failed");
                        }
                    }
                    _ => warn!("Unexpected message type in coin test"),
                }
            }
        });
    }
}

/// Spawns a router per party feeding its inbound traffic into a standalone
/// agreement instance and the coin backing it.
pub fn spawn_ba_routers(
    parties: &[(BinaryAgreement, CommonCoin)],
    receivers: Vec<Receiver<Vec<u8>>>,
    net: Arc<FakeNetwork>,
) {
    for ((ba, coin), mut rx) in parties.iter().cloned().zip(receivers.into_iter()) {
        let net = net.clone();
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                let wrapped: WrappedMessage = match bincode::deserialize(&raw) {
                    Ok(m) => m,
                    Err(_) => {
                        warn!("Malformed or unrecognized message format.");
                        continue;
                    }
                };
                match wrapped {
                    WrappedMessage::Ba(msg) => {
                        if let Err(e) = ba.process(msg, net.clone()).await {
                            warn!(error = ?e, "Agreement message processing failed");
                        }
                    }
                    WrappedMessage::Coin(msg) => {
                        if let Err(e) = coin.process(msg).await {
                            warn!(error = ?e, "Coin message processing failed");
                        }
                    }
                    _ => warn!("Unexpected message type in agreement test"),
                }
            }
        });
    }
}

/// Spawns a router per party feeding its inbound traffic into a standalone
/// broadcast instance.
pub fn spawn_rbc_routers(
    parties: &[Bracha],
    receivers: Vec<Receiver<Vec<u8>>>,
    net: Arc<FakeNetwork>,
) {
    for (rbc, mut rx) in parties.iter().cloned().zip(receivers.into_iter()) {
        let net = net.clone();
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                let wrapped: WrappedMessage = match bincode::deserialize(&raw) {
                    Ok(m) => m,
                    Err(_) => {
                        warn!("Malformed or unrecognized message format.");
                        continue;
                    }
                };
                match wrapped {
                    WrappedMessage::Rbc(msg) => {
                        if let Err(e) = rbc.process(msg, net.clone()).await {
                            warn!(error = ?e, "Broadcast message processing failed");
                        }
                    }
                    _ => warn!("Unexpected message type in broadcast test"),
                }
            }
        });
    }
}

/// Spawns a router per party feeding its inbound traffic into its common
/// subset node, which demultiplexes to the sub-protocols.
pub fn spawn_acs_routers(
    nodes: &[CommonSubset],
    receivers: Vec<Receiver<Vec<u8>>>,
    net: Arc<FakeNetwork>,
) {
    for (node, mut rx) in nodes.iter().cloned().zip(receivers.into_iter()) {
        let net = net.clone();
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                if let Err(e) = node.process(raw, net.clone()).await {
                    warn!(error = ?e, "Message processing failed");
                }
            }
        });
    }
}
