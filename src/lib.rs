/// This module implements the asynchronous BFT agreement core used by the
/// HoneyBadger-style MPC protocols: a threshold common coin, the binary
/// Byzantine agreement of [MMR14] and the asynchronous common subset of
/// [BKR93], as described in
/// ["HoneyBadgerMPC and AsynchroMix: Practical AsynchronousMPC and its Application to Anonymous Communication"][honeybadger-paper].
///
/// [honeybadger-paper]: https://eprint.iacr.org/2019/883.pdf
pub mod agreement;

/// Network abstraction the protocol nodes talk through, plus an in-process
/// channel-backed network used by the test harnesses.
pub mod net;
