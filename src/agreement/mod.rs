/// This module contains the implementation of the threshold common coin built
/// on threshold signatures. One unbiased, globally-consistent random bit is
/// produced per (session, round).
pub mod common_coin;

/// This module contains the implementation of the binary Byzantine agreement
/// protocol from the paper "Signature-Free Asynchronous Byzantine Consensus
/// with t < n/3 and O(n^2) Messages" (MMR14).
pub mod binary_agreement;

/// This module contains the implementation of the asynchronous common subset
/// protocol from BKR93, composing `n` reliable broadcasts with `n` binary
/// agreement instances.
pub mod common_subset;

/// Bracha reliable broadcast, consumed by the common subset as the value
/// dissemination primitive.
pub mod rbc;

use crate::agreement::{
    binary_agreement::BaError, common_coin::CoinError, common_subset::AcsError, rbc::RbcError,
};
use bincode::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgreementError {
    #[error("error in the common coin: {0:?}")]
    CoinError(#[from] CoinError),
    #[error("error in the binary agreement: {0:?}")]
    BaError(#[from] BaError),
    #[error("error in the reliable broadcast: {0:?}")]
    RbcError(#[from] RbcError),
    #[error("error in the common subset: {0:?}")]
    AcsError(#[from] AcsError),
    /// Error during the serialization using [`bincode`].
    #[error("error during the serialization using bincode: {0:?}")]
    BincodeSerializationError(#[from] Box<ErrorKind>),
}

/// How a node reacts to a second EST/AUX/CONF message from the same sender
/// for the same round and value. Retransmission and multi-path delivery can
/// produce duplicates legitimately, so the default treats them like any other
/// Byzantine input: log, flag the sender and move on. Strict mode turns them
/// into errors so test environments can assert no duplicates occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    #[default]
    Lenient,
    Strict,
}

///Used for routing messages to respective sub-protocols
#[derive(Serialize, Deserialize, Debug)]
pub enum WrappedMessage {
    Coin(common_coin::CoinMessage),
    Ba(binary_agreement::BaMessage),
    Rbc(rbc::rbc_store::RbcMessage),
}

//-----------------Session-ID-----------------
//Used for re-routing inter-protocol messages
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    None = 0,
    Coin = 1,
    BinaryAgreement = 2,
    Rbc = 3,
    CommonSubset = 4,
}

impl TryFrom<u8> for ProtocolType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtocolType::None),
            1 => Ok(ProtocolType::Coin),
            2 => Ok(ProtocolType::BinaryAgreement),
            3 => Ok(ProtocolType::Rbc),
            4 => Ok(ProtocolType::CommonSubset),
            _ => Err(()),
        }
    }
}

/// A session denotes the execution of one sub-protocol instance. The session
/// ID uniquely identifies a given session and consists of
///
///   - protocol ID: the sub-protocol the messages of this session belong to
///   - slot: the common-subset sub-instance index `j` this session serves;
///     free-form for standalone sessions
///   - instance ID: binds the session to one invocation of the enclosing
///     protocol
///
/// Rounds are not part of the session ID: the binary agreement runs an
/// unbounded number of rounds, so the round travels inside the message.
#[derive(PartialOrd, Ord, Clone, Serialize, Deserialize, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let protocol = ((self.0 >> 40) & 0xFF) as u8;
        write!(
            f,
            "[protocol={},slot={},instance_id={}]",
            protocol,
            self.slot(),
            self.instance_id()
        )
    }
}

impl SessionId {
    pub fn new(protocol: ProtocolType, slot: u8, instance_id: u32) -> Self {
        let value =
            ((protocol as u64 & 0xFF) << 40) | ((slot as u64 & 0xFF) << 32) | instance_id as u64;
        SessionId(value)
    }

    //First 8 used bits
    pub fn protocol(self) -> Option<ProtocolType> {
        let val = ((self.0 >> 40) & 0xFF) as u8;
        ProtocolType::try_from(val).ok()
    }

    //Second 8 bits
    pub fn slot(self) -> u8 {
        ((self.0 >> 32) & 0xFF) as u8
    }

    //Last 32 bits
    pub fn instance_id(self) -> u32 {
        self.0 as u32
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id() {
        let protocol = ProtocolType::BinaryAgreement;
        let slot = 7u8;
        let instance_id = 0xDEADBEEF;

        let session_id = SessionId::new(protocol, slot, instance_id);

        assert_eq!(session_id.protocol().unwrap(), protocol);
        assert_eq!(session_id.slot(), slot);
        assert_eq!(session_id.instance_id(), instance_id);

        let session_id2 = SessionId::new(
            session_id.protocol().unwrap(),
            session_id.slot(),
            session_id.instance_id(),
        );

        assert_eq!(session_id, session_id2);
    }

    #[test]
    fn test_session_id_debug_format() {
        let session_id = SessionId::new(ProtocolType::Rbc, 3, 42);
        assert_eq!(
            format!("{:?}", session_id),
            "[protocol=3,slot=3,instance_id=42]"
        );
    }
}
