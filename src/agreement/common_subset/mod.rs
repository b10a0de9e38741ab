pub mod acs_store;
pub mod common_subset;

pub use common_subset::CommonSubset;

use crate::agreement::{binary_agreement::BaError, common_coin::CoinError, rbc::RbcError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcsError {
    #[error("Invalid threshold f={0} for n={1}, must satisfy f < ceil(n / 3)")]
    InvalidThreshold(usize, usize),

    /// A correctly composed coin and agreement can never end with fewer than
    /// n - f instances deciding one; this is a protocol invariant violation.
    #[error("only {0} agreement instances decided one, expected at least {1}")]
    TooFewOnes(usize, usize),

    #[error("a background task failed to join")]
    JoinError,

    #[error("error in the common coin: {0:?}")]
    CoinError(#[from] CoinError),

    #[error("error in the binary agreement: {0:?}")]
    BaError(#[from] BaError),

    #[error("error in the reliable broadcast: {0:?}")]
    RbcError(#[from] RbcError),
}
