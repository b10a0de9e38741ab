use super::{ba_store::BaStore, BaError, BaMessage, BaMsgKind, ValueSet};
use crate::agreement::{common_coin::CommonCoin, FaultPolicy, SessionId, WrappedMessage};
use crate::net::{Network, PartyId};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

///--------------------------Binary agreement--------------------------
///
/// Binary consensus from [MMR14]. Each round runs three phases before
/// consulting the common coin:
///
/// 1. EST: multicast `EST(r, est)`. On receiving `EST(r, v)` from f + 1
///    distinct senders, relay it if not done yet; on 2f + 1 distinct senders,
///    add `v` to `bin_values_r`.
/// 2. AUX: once `bin_values_r` is non-empty, multicast `AUX(r, w)` for some
///    `w` in it, then wait until n - f aux votes are compatible with
///    `bin_values_r`, yielding the candidate set `values`.
/// 3. CONF: multicast `CONF(r, bin_values_r)` and wait until n - f conf votes
///    re-confirm a candidate set against the (possibly grown) `bin_values_r`.
///
/// With `s` the coin of round `r`: a singleton `values = {v}` decides `v`
/// when `v == s` and carries `v` into the next round either way; `values =
/// {0, 1}` adopts the coin. A party that confirms its own decision a second
/// time is no longer needed by anyone and stops participating.
#[derive(Clone)]
pub struct BinaryAgreement {
    pub id: PartyId,   // The ID of this party
    pub n: usize,      // Total number of parties in the network
    pub f: usize,      // Number of allowed malicious parties
    pub fault_policy: FaultPolicy,
    pub store: Arc<Mutex<HashMap<SessionId, Arc<Mutex<BaStore>>>>>, // Stores the session state
}

/// Outcome of the estimate update at the end of a round.
enum Step {
    Continue(bool),
    Quiescent(bool),
}

impl BinaryAgreement {
    /// Creates a new binary agreement instance with the given parameters.
    pub fn new(
        id: PartyId,
        n: usize,
        f: usize,
        fault_policy: FaultPolicy,
    ) -> Result<Self, BaError> {
        if !(f < (n + 2) / 3) {
            // ceil(n / 3)
            return Err(BaError::InvalidThreshold(f, n));
        }
        Ok(Self {
            id,
            n,
            f,
            fault_policy,
            store: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Sets the initial estimate of a session. The first value wins; later
    /// calls are ignored.
    pub async fn provide_input(&self, session_id: SessionId, value: bool) {
        let session_store = self.get_or_create_store(session_id).await;
        let mut store = session_store.lock().await;
        if !store.set_input(value) {
            debug!(
                id = self.id,
                session_id = session_id.as_u64(),
                "input already provided, ignoring"
            );
        }
    }

    /// Blocks until this session has decided and returns the decided bit.
    /// The decision is available long before the instance goes quiescent.
    pub async fn wait_decision(&self, session_id: SessionId) -> bool {
        let session_store = self.get_or_create_store(session_id).await;
        loop {
            let notify = {
                let store = session_store.lock().await;
                if let Some(value) = store.decided {
                    return value;
                }
                store.decision_signal.clone()
            };
            notify.notified().await;
        }
    }

    /// Drives one agreement session: waits for the input, then runs rounds
    /// until the decision has been confirmed twice against the coin, the
    /// point at which this party's participation is provably no longer
    /// needed. The decision itself is published through [`wait_decision`]
    /// the moment it is reached.
    ///
    /// [`wait_decision`]: BinaryAgreement::wait_decision
    pub async fn run<N: Network + Send + Sync>(
        &self,
        session_id: SessionId,
        coin: &CommonCoin,
        net: Arc<N>,
    ) -> Result<bool, BaError> {
        let session_store = self.get_or_create_store(session_id).await;

        // Block waiting for the input.
        let mut est = loop {
            let notify = {
                let store = session_store.lock().await;
                if let Some(value) = store.input {
                    break value;
                }
                store.input_signal.clone()
            };
            notify.notified().await;
        };

        let mut round: u32 = 0;
        loop {
            // Unbounded number of rounds
            debug!(
                id = self.id,
                session_id = session_id.as_u64(),
                round,
                est = est as u8,
                "starting round"
            );

            // EST phase
            let send_est = {
                let mut store = session_store.lock().await;
                let state = store.round_mut(round);
                if state.est_sent[est as usize] {
                    false
                } else {
                    state.est_sent[est as usize] = true;
                    true
                }
            };
            if send_est {
                let msg = BaMessage::new(session_id, self.id, round, BaMsgKind::Est(est));
                self.broadcast(msg, net.clone()).await?;
            }

            // Block until a value reaches the 2f+1 threshold.
            let w = loop {
                let notify = {
                    let store = session_store.lock().await;
                    if let Some(state) = store.round(round) {
                        if let Some(&w) = state.bin_values.iter().next() {
                            break w;
                        }
                    }
                    store.bv_signal.clone()
                };
                notify.notified().await;
            };

            // AUX phase
            let msg = BaMessage::new(session_id, self.id, round, BaMsgKind::Aux(w));
            self.broadcast(msg, net.clone()).await?;

            // Block until at least n-f AUX votes compatible with bin_values
            // are received.
            let mut values = loop {
                let notify = {
                    let store = session_store.lock().await;
                    if let Some(outcome) =
                        store.round(round).and_then(|s| s.aux_outcome(self.n, self.f))
                    {
                        break outcome;
                    }
                    store.bv_signal.clone()
                };
                notify.notified().await;
            };
            debug!(
                id = self.id,
                session_id = session_id.as_u64(),
                round,
                values = %values,
                "completed AUX phase"
            );

            // CONF phase. The guard is keyed by the AUX outcome, while the
            // broadcast reports the current bin_values.
            let conf = {
                let mut store = session_store.lock().await;
                let state = store.round_mut(round);
                if state.conf_sent(values) {
                    None
                } else {
                    state.mark_conf_sent(values);
                    ValueSet::from_bin_values(&state.bin_values)
                }
            };
            if let Some(conf) = conf {
                let msg = BaMessage::new(session_id, self.id, round, BaMsgKind::Conf(conf));
                self.broadcast(msg, net.clone()).await?;

                // Block until at least n-f CONF votes re-confirm a set.
                values = loop {
                    let notify = {
                        let store = session_store.lock().await;
                        if let Some(outcome) =
                            store.round(round).and_then(|s| s.conf_outcome(self.n, self.f))
                        {
                            break outcome;
                        }
                        store.bv_signal.clone()
                    };
                    notify.notified().await;
                };
                debug!(
                    id = self.id,
                    session_id = session_id.as_u64(),
                    round,
                    values = %values,
                    "completed CONF phase"
                );
            }

            // Block until receiving the common coin value.
            let s = coin.get_coin(session_id, round, net.clone()).await?;
            debug!(
                id = self.id,
                session_id = session_id.as_u64(),
                round,
                coin = s,
                "received coin"
            );

            match self.set_new_estimate(&session_store, session_id, values, s).await {
                Step::Continue(next_est) => est = next_est,
                Step::Quiescent(value) => {
                    info!(
                        id = self.id,
                        session_id = session_id.as_u64(),
                        round,
                        value = value as u8,
                        "decision confirmed twice, going quiescent"
                    );
                    return Ok(value);
                }
            }
            round += 1;
        }
    }

    /// Processes incoming messages based on their phase.
    pub async fn process<N: Network + Send + Sync>(
        &self,
        msg: BaMessage,
        net: Arc<N>,
    ) -> Result<(), BaError> {
        if msg.sender >= self.n {
            return Err(BaError::UnknownSender(msg.sender, self.n));
        }
        match msg.kind {
            BaMsgKind::Est(value) => self.est_handler(msg, value, net).await,
            BaMsgKind::Aux(value) => self.aux_handler(msg, value).await,
            BaMsgKind::Conf(values) => self.conf_handler(msg, values).await,
        }
    }

    /// Handles an estimate vote: relays it once f + 1 senders back the value
    /// and installs the value into bin_values at 2f + 1.
    async fn est_handler<N: Network + Send + Sync>(
        &self,
        msg: BaMessage,
        value: bool,
        net: Arc<N>,
    ) -> Result<(), BaError> {
        let session_store = self.get_or_create_store(msg.session_id).await;
        let mut store = session_store.lock().await;

        let state = store.round_mut(msg.round);
        if state.has_est(msg.sender, value) {
            return self.note_equivocation(&mut store, &msg);
        }
        state.est_values[value as usize].insert(msg.sender);
        let count = state.est_values[value as usize].len();

        // Relay after reaching the first threshold. The amplification
        // guarantees eventual propagation to all honest nodes even without
        // all-to-all delivery of the original EST.
        let relay = count >= self.f + 1 && !state.est_sent[value as usize];
        if relay {
            state.est_sent[value as usize] = true;
        }

        // Output after reaching the second threshold.
        if count >= 2 * self.f + 1 && state.bin_values.insert(value) {
            debug!(
                id = self.id,
                session_id = msg.session_id.as_u64(),
                round = msg.round,
                value = value as u8,
                "added value to bin_values"
            );
            store.bv_signal.notify_one();
        }
        drop(store);

        if relay {
            let relay_msg =
                BaMessage::new(msg.session_id, self.id, msg.round, BaMsgKind::Est(value));
            self.broadcast(relay_msg, net).await?;
        }
        Ok(())
    }

    /// Handles an aux vote. Votes are recorded regardless of the current
    /// bin_values; the exit conditions intersect with bin_values when they
    /// are evaluated.
    async fn aux_handler(&self, msg: BaMessage, value: bool) -> Result<(), BaError> {
        let session_store = self.get_or_create_store(msg.session_id).await;
        let mut store = session_store.lock().await;

        let state = store.round_mut(msg.round);
        if state.has_aux(msg.sender, value) {
            return self.note_equivocation(&mut store, &msg);
        }
        state.aux_values[value as usize].insert(msg.sender);
        store.bv_signal.notify_one();
        Ok(())
    }

    /// Handles a conf vote.
    async fn conf_handler(&self, msg: BaMessage, values: ValueSet) -> Result<(), BaError> {
        let session_store = self.get_or_create_store(msg.session_id).await;
        let mut store = session_store.lock().await;

        let state = store.round_mut(msg.round);
        if state.has_conf(msg.sender, values) {
            return self.note_equivocation(&mut store, &msg);
        }
        state.insert_conf(msg.sender, values);
        store.bv_signal.notify_one();
        Ok(())
    }

    /// The estimate update at the end of a round: a singleton matching the
    /// coin decides; a singleton mismatching it stays the estimate; a full
    /// candidate set adopts the coin.
    async fn set_new_estimate(
        &self,
        session_store: &Arc<Mutex<BaStore>>,
        session_id: SessionId,
        values: ValueSet,
        s: bool,
    ) -> Step {
        let mut store = session_store.lock().await;
        match values.singleton() {
            Some(v) => {
                if v == s {
                    match store.decided {
                        None => {
                            store.set_decided(v);
                            info!(
                                id = self.id,
                                session_id = session_id.as_u64(),
                                value = v as u8,
                                "decided"
                            );
                        }
                        // Confirming the decided value against the coin a
                        // second time ends this party's participation; at
                        // most f parties can still be waiting on it.
                        Some(decided) if decided == v => return Step::Quiescent(v),
                        Some(_) => {}
                    }
                }
                Step::Continue(v)
            }
            None => Step::Continue(s),
        }
    }

    /// A second EST/AUX/CONF from the same sender for the same round and
    /// value. Lenient mode treats it like any other Byzantine input and
    /// flags the sender; strict mode turns it into an error.
    fn note_equivocation(&self, store: &mut BaStore, msg: &BaMessage) -> Result<(), BaError> {
        warn!(
            id = self.id,
            session_id = msg.session_id.as_u64(),
            sender = msg.sender,
            round = msg.round,
            kind = %msg.kind,
            "redundant message received"
        );
        match self.fault_policy {
            FaultPolicy::Strict => Err(BaError::RedundantMessage(
                msg.kind.phase(),
                msg.sender,
                msg.round,
            )),
            FaultPolicy::Lenient => {
                store.flagged.insert(msg.sender);
                Ok(())
            }
        }
    }

    async fn broadcast<N: Network + Send + Sync>(
        &self,
        msg: BaMessage,
        net: Arc<N>,
    ) -> Result<(), BaError> {
        let wrapped = WrappedMessage::Ba(msg);
        let encoded = bincode::serialize(&wrapped).map_err(BaError::SerializationError)?;
        net.broadcast(&encoded)
            .await
            .map_err(BaError::NetworkError)?;
        Ok(())
    }

    async fn get_or_create_store(&self, session_id: SessionId) -> Arc<Mutex<BaStore>> {
        let mut store = self.store.lock().await;
        // Get or create the session state for the current session.
        store
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(BaStore::default())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_params() {
        assert!(BinaryAgreement::new(0, 4, 1, FaultPolicy::Lenient).is_ok());
        assert!(BinaryAgreement::new(2, 7, 2, FaultPolicy::Strict).is_ok());
        assert!(BinaryAgreement::new(0, 3, 0, FaultPolicy::Lenient).is_ok());
    }

    #[test]
    fn test_invalid_threshold() {
        let ba = BinaryAgreement::new(0, 4, 2, FaultPolicy::Lenient);
        assert!(ba.is_err(), "Expected invalid f to fail");
        let ba = BinaryAgreement::new(0, 9, 4, FaultPolicy::Lenient);
        assert!(ba.is_err(), "Expected invalid f to fail");
    }
}
