pub mod rbc;
pub mod rbc_store;

pub use rbc::Bracha;

use crate::net::{NetworkError, PartyId};
use bincode::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RbcError {
    #[error("Invalid threshold f={0} for n={1}, must satisfy f < ceil(n / 3)")]
    InvalidThreshold(usize, usize),

    #[error("sender id {0} is out of range for n = {1}")]
    UnknownSender(PartyId, usize),

    #[error("there was an error in the network: {0:?}")]
    NetworkError(#[from] NetworkError),

    #[error("error while serializing the object into bytes: {0:?}")]
    SerializationError(#[from] Box<ErrorKind>),
}
