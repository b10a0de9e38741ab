use super::{Network, NetworkError, PartyId};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, Receiver, Sender};

/// Configuration for the [`FakeNetwork`].
pub struct FakeNetworkConfig {
    pub channel_buff_size: usize,
}

impl FakeNetworkConfig {
    pub fn new(channel_buff_size: usize) -> Self {
        Self { channel_buff_size }
    }
}

/// In-process network backed by one mpsc channel per party. Every party sends
/// through the same instance; inbound traffic for party `i` arrives on the
/// `i`-th receiver returned by [`FakeNetwork::new`]. A party whose receiver
/// has been dropped behaves like a crashed node: broadcasts silently skip it.
pub struct FakeNetwork {
    senders: Vec<Sender<Vec<u8>>>,
}

impl FakeNetwork {
    pub fn new(n_parties: usize, config: FakeNetworkConfig) -> (Self, Vec<Receiver<Vec<u8>>>) {
        let mut senders = Vec::with_capacity(n_parties);
        let mut receivers = Vec::with_capacity(n_parties);
        for _ in 0..n_parties {
            let (tx, rx) = mpsc::channel(config.channel_buff_size);
            senders.push(tx);
            receivers.push(rx);
        }
        (Self { senders }, receivers)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn send(&self, recipient: PartyId, payload: &[u8]) -> Result<usize, NetworkError> {
        let sender = self
            .senders
            .get(recipient)
            .ok_or(NetworkError::NotConnected(recipient))?;
        sender
            .send(payload.to_vec())
            .await
            .map_err(|_| NetworkError::ChannelClosed(recipient))?;
        Ok(payload.len())
    }

    async fn broadcast(&self, payload: &[u8]) -> Result<usize, NetworkError> {
        let mut sent = 0;
        for sender in &self.senders {
            // A closed channel is a crashed party, not a broadcast failure.
            if sender.send(payload.to_vec()).await.is_ok() {
                sent += payload.len();
            }
        }
        Ok(sent)
    }

    fn n_parties(&self) -> usize {
        self.senders.len()
    }
}
