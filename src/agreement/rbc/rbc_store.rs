use crate::agreement::SessionId;
use crate::net::PartyId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

/// Wire message of the Bracha broadcast.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RbcMessage {
    pub session_id: SessionId, // Unique session ID for each broadcast instance
    pub sender: PartyId,       // ID of the sender node
    pub kind: RbcMsgType,      // INIT, ECHO or READY
    pub payload: Vec<u8>,      // Actual data being broadcasted
}

impl RbcMessage {
    /// Constructor to create a new message.
    pub fn new(session_id: SessionId, sender: PartyId, kind: RbcMsgType, payload: Vec<u8>) -> Self {
        RbcMessage {
            session_id,
            sender,
            kind,
            payload,
        }
    }
}

/// Enum to interpret message types in Bracha's protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RbcMsgType {
    Init,
    Echo,
    Ready,
}

impl fmt::Display for RbcMsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RbcMsgType::Init => write!(f, "Init"),
            RbcMsgType::Echo => write!(f, "Echo"),
            RbcMsgType::Ready => write!(f, "Ready"),
        }
    }
}

fn hash_message(message: &[u8]) -> Vec<u8> {
    Sha256::digest(message).to_vec()
}

/// Stores the internal state for each broadcast session at a party.
/// Bracha's RBC involves thresholds for ECHO and READY messages to achieve
/// agreement on the delivered value.
#[derive(Default)]
pub struct BrachaStore {
    pub echo_senders: HashMap<PartyId, bool>, // Which parties sent ECHO (sender -> true)
    pub ready_senders: HashMap<PartyId, bool>, // Which parties sent READY (sender -> true)
    pub echo_count: HashMap<Vec<u8>, usize>,  // Count of ECHO messages per payload hash
    pub ready_count: HashMap<Vec<u8>, usize>, // Count of READY messages per payload hash
    pub ended: bool,                          // True if agreement is reached and protocol ended
    pub echo: bool,                           // True if this party already sent an ECHO
    pub ready: bool,                          // True if this party already sent a READY
    pub output: Option<Vec<u8>>,              // Agreed value after termination
    pub notify: Arc<Notify>,                  // Wakes the single output waiter
}

impl BrachaStore {
    /// Returns true if the given sender has sent an echo.
    pub fn has_echo(&self, sender: PartyId) -> bool {
        self.echo_senders.get(&sender).copied().unwrap_or(false)
    }

    /// Returns true if the given sender has sent a ready.
    pub fn has_ready(&self, sender: PartyId) -> bool {
        self.ready_senders.get(&sender).copied().unwrap_or(false)
    }

    /// Marks that an echo was sent by a given node
    pub fn set_echo_sent(&mut self, node_id: PartyId) {
        self.echo_senders.insert(node_id, true);
    }

    /// Marks that a ready was sent by a given node
    pub fn set_ready_sent(&mut self, node_id: PartyId) {
        self.ready_senders.insert(node_id, true);
    }

    /// Increments echo count for a given message
    pub fn increment_echo(&mut self, message: &[u8]) {
        let hash = hash_message(message);
        *self.echo_count.entry(hash).or_insert(0) += 1;
    }

    /// Increments ready count for a given message
    pub fn increment_ready(&mut self, message: &[u8]) {
        let hash = hash_message(message);
        *self.ready_count.entry(hash).or_insert(0) += 1;
    }

    /// Gets echo count for a message
    pub fn get_echo_count(&self, message: &[u8]) -> usize {
        let hash = hash_message(message);
        *self.echo_count.get(&hash).unwrap_or(&0)
    }

    /// Gets ready count for a message
    pub fn get_ready_count(&self, message: &[u8]) -> usize {
        let hash = hash_message(message);
        *self.ready_count.get(&hash).unwrap_or(&0)
    }

    /// Sets ended flag to true
    pub fn mark_ended(&mut self) {
        self.ended = true;
    }

    /// Sets echo flag to true
    pub fn mark_echo(&mut self) {
        self.echo = true;
    }

    /// Sets ready flag to true
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Sets the delivered value and wakes the output waiter.
    pub fn set_output(&mut self, value: Vec<u8>) {
        self.output = Some(value);
        self.notify.notify_one();
    }
}
