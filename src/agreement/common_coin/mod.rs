pub mod common_coin;

pub use common_coin::{CommonCoin, Dealer};

use crate::agreement::SessionId;
use crate::net::{NetworkError, PartyId};
use bincode::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoinError {
    #[error("the key set combines {0}+1 shares, expected f+1 = {1}")]
    InvalidThreshold(usize, usize),

    #[error("sender id {0} is out of range for n = {1}")]
    UnknownSender(PartyId, usize),

    #[error("failed to combine signature shares for round {0}: {1}")]
    CombineFailed(u32, String),

    #[error("combined signature failed verification for round {0}")]
    CombinedSignatureInvalid(u32),

    #[error("there was an error in the network: {0:?}")]
    NetworkError(#[from] NetworkError),

    #[error("error while serializing the object into bytes: {0:?}")]
    SerializationError(#[from] Box<ErrorKind>),
}

/// One threshold signature share over the coin name of `(session, round)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoinMessage {
    pub session_id: SessionId,
    pub sender: PartyId,
    pub round: u32,
    pub share: Vec<u8>,
}

impl CoinMessage {
    pub fn new(session_id: SessionId, sender: PartyId, round: u32, share: Vec<u8>) -> Self {
        Self {
            session_id,
            sender,
            round,
            share,
        }
    }
}
