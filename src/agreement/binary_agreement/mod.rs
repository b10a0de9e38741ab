pub mod ba_store;
pub mod binary_agreement;

pub use binary_agreement::BinaryAgreement;

use crate::agreement::{common_coin::CoinError, SessionId};
use crate::net::{NetworkError, PartyId};
use bincode::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BaError {
    #[error("Invalid threshold f={0} for n={1}, must satisfy f < ceil(n / 3)")]
    InvalidThreshold(usize, usize),

    #[error("sender id {0} is out of range for n = {1}")]
    UnknownSender(PartyId, usize),

    #[error("redundant {0} message from sender {1} in round {2}")]
    RedundantMessage(&'static str, PartyId, u32),

    #[error("there was an error in the network: {0:?}")]
    NetworkError(#[from] NetworkError),

    #[error("error while serializing the object into bytes: {0:?}")]
    SerializationError(#[from] Box<ErrorKind>),

    #[error("error in the common coin: {0:?}")]
    CoinError(#[from] CoinError),
}

/// The set of candidate decision values a round has narrowed down to. Also
/// the payload of a CONF message, where it reports the sender's bin_values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueSet {
    Zero,
    One,
    Both,
}

impl ValueSet {
    /// Maps a non-empty bin_values set to the value set describing it.
    pub fn from_bin_values(bin_values: &HashSet<bool>) -> Option<Self> {
        match (bin_values.contains(&false), bin_values.contains(&true)) {
            (true, true) => Some(ValueSet::Both),
            (false, true) => Some(ValueSet::One),
            (true, false) => Some(ValueSet::Zero),
            (false, false) => None,
        }
    }

    /// The single value of this set, if there is exactly one.
    pub fn singleton(self) -> Option<bool> {
        match self {
            ValueSet::Zero => Some(false),
            ValueSet::One => Some(true),
            ValueSet::Both => None,
        }
    }

    /// Whether every value of this set is contained in `bin_values`.
    pub fn is_subset(self, bin_values: &HashSet<bool>) -> bool {
        match self {
            ValueSet::Zero => bin_values.contains(&false),
            ValueSet::One => bin_values.contains(&true),
            ValueSet::Both => bin_values.contains(&false) && bin_values.contains(&true),
        }
    }
}

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ValueSet::Zero => write!(f, "{{0}}"),
            ValueSet::One => write!(f, "{{1}}"),
            ValueSet::Both => write!(f, "{{0,1}}"),
        }
    }
}

/// Enum to interpret the three message phases of one agreement round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum BaMsgKind {
    Est(bool),
    Aux(bool),
    Conf(ValueSet),
}

impl BaMsgKind {
    /// The phase tag, used in logs and fault reports.
    pub fn phase(&self) -> &'static str {
        match self {
            BaMsgKind::Est(_) => "EST",
            BaMsgKind::Aux(_) => "AUX",
            BaMsgKind::Conf(_) => "CONF",
        }
    }
}

impl fmt::Display for BaMsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaMsgKind::Est(v) => write!(f, "Est({})", *v as u8),
            BaMsgKind::Aux(v) => write!(f, "Aux({})", *v as u8),
            BaMsgKind::Conf(vs) => write!(f, "Conf({})", vs),
        }
    }
}

/// Wire message of one binary agreement instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaMessage {
    pub session_id: SessionId,
    pub sender: PartyId,
    pub round: u32,
    pub kind: BaMsgKind,
}

impl BaMessage {
    pub fn new(session_id: SessionId, sender: PartyId, round: u32, kind: BaMsgKind) -> Self {
        Self {
            session_id,
            sender,
            round,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_set_from_bin_values() {
        let mut bin_values = HashSet::new();
        assert_eq!(ValueSet::from_bin_values(&bin_values), None);
        bin_values.insert(true);
        assert_eq!(ValueSet::from_bin_values(&bin_values), Some(ValueSet::One));
        bin_values.insert(false);
        assert_eq!(ValueSet::from_bin_values(&bin_values), Some(ValueSet::Both));
        bin_values.remove(&true);
        assert_eq!(ValueSet::from_bin_values(&bin_values), Some(ValueSet::Zero));
    }

    #[test]
    fn test_value_set_subset() {
        let bin_values: HashSet<bool> = [true].into_iter().collect();
        assert!(ValueSet::One.is_subset(&bin_values));
        assert!(!ValueSet::Zero.is_subset(&bin_values));
        assert!(!ValueSet::Both.is_subset(&bin_values));

        let both: HashSet<bool> = [true, false].into_iter().collect();
        assert!(ValueSet::Both.is_subset(&both));
    }
}
