pub mod fake_network;

use async_trait::async_trait;
use thiserror::Error;

/// Type to identify a party in a protocol.
pub type PartyId = usize;

/// Error type for network related issues.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("the participant {0} is not connected")]
    NotConnected(PartyId),
    #[error("the channel to participant {0} is closed")]
    ChannelClosed(PartyId),
}

/// Trait that represents a network used to communicate messages during the
/// execution of a protocol. Implementations deliver raw bytes; the protocol
/// layer wraps and unwraps its own message types.
#[async_trait]
pub trait Network: Send + Sync {
    /// Send a message through the network to the given party. The function
    /// returns the number of bytes sent to the recipient.
    async fn send(&self, recipient: PartyId, payload: &[u8]) -> Result<usize, NetworkError>;

    /// Broadcasts a message to all the parties connected to the network,
    /// including the sender itself. The function returns the number of bytes
    /// broadcasted to the network.
    async fn broadcast(&self, payload: &[u8]) -> Result<usize, NetworkError>;

    /// Returns the number of parties connected to this network.
    fn n_parties(&self) -> usize;
}
