use super::{acs_store::AcsStore, AcsError};
use crate::agreement::{
    binary_agreement::BinaryAgreement, common_coin::CommonCoin, rbc::Bracha, AgreementError,
    FaultPolicy, ProtocolType, SessionId, WrappedMessage,
};
use crate::net::{Network, PartyId};
use std::sync::Arc;
use threshold_crypto::{PublicKeySet, SecretKeyShare};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

///--------------------------Asynchronous common subset--------------------------
///
/// The BKR93 algorithm: every party proposes one value and the parties agree
/// on a subset of at least n - f of them.
/// 1. n reliable broadcasts disseminate the proposed values, one slot per
///    party, the slot's leader being its proposer.
/// 2. n binary agreement instances decide, per slot, whether its broadcast is
///    part of the common subset: a slot whose broadcast delivered is voted 1;
///    once n - f slots decided one, every undecided slot is voted 0 so that
///    slots whose leader stays silent terminate as well.
/// 3. The result takes the broadcast value of every slot that decided one
///    and leaves the others empty, abandoning their broadcasts mid-flight.
///
/// All sub-protocol traffic is multiplexed over one inbound stream; the
/// message enum and the slot byte of the session id route each message to
/// the right sub-protocol instance.
#[derive(Clone)]
pub struct CommonSubset {
    pub id: PartyId,      // The ID of this party
    pub n: usize,         // Total number of parties in the network
    pub f: usize,         // Number of allowed malicious parties
    pub instance_id: u32, // Binds all sub-protocol sessions to this run
    pub rbc: Bracha,      // Value dissemination, one session per slot
    pub ba: BinaryAgreement, // Slot inclusion votes, one session per slot
    pub coin: CommonCoin, // Round randomness for the agreement instances
    pub store: Arc<Mutex<AcsStore>>, // Stores the result slots
}

impl CommonSubset {
    /// Creates a new common subset instance with the given parameters.
    pub fn new(
        id: PartyId,
        n: usize,
        f: usize,
        instance_id: u32,
        pk: PublicKeySet,
        sk: SecretKeyShare,
        fault_policy: FaultPolicy,
    ) -> Result<Self, AcsError> {
        if !(f < (n + 2) / 3) {
            // ceil(n / 3)
            return Err(AcsError::InvalidThreshold(f, n));
        }
        let rbc = Bracha::new(id, n, f)?;
        let ba = BinaryAgreement::new(id, n, f, fault_policy)?;
        let coin = CommonCoin::new(id, n, f, pk, sk)?;
        Ok(Self {
            id,
            n,
            f,
            instance_id,
            rbc,
            ba,
            coin,
            store: Arc::new(Mutex::new(AcsStore::default())),
        })
    }

    /// The broadcast session of a slot.
    pub fn rbc_session(&self, slot: usize) -> SessionId {
        SessionId::new(ProtocolType::Rbc, slot as u8, self.instance_id)
    }

    /// The agreement session of a slot; its coin shares the same session.
    pub fn ba_session(&self, slot: usize) -> SessionId {
        SessionId::new(ProtocolType::BinaryAgreement, slot as u8, self.instance_id)
    }

    /// Routes one raw inbound message to the sub-protocol it belongs to.
    pub async fn process<N: Network + Send + Sync>(
        &self,
        raw_msg: Vec<u8>,
        net: Arc<N>,
    ) -> Result<(), AgreementError> {
        let wrapped: WrappedMessage = bincode::deserialize(&raw_msg)?;
        match wrapped {
            WrappedMessage::Coin(msg) => self.coin.process(msg).await?,
            WrappedMessage::Ba(msg) => self.ba.process(msg, net).await?,
            WrappedMessage::Rbc(msg) => self.rbc.process(msg, net).await?,
        }
        Ok(())
    }

    /// Runs the common subset with this party's proposed value, returning one
    /// slot per party: the broadcast value for every slot the agreement
    /// included, empty for the excluded ones.
    pub async fn run<N: Network + Send + Sync + 'static>(
        &self,
        input: Vec<u8>,
        net: Arc<N>,
    ) -> Result<Vec<Option<Vec<u8>>>, AcsError> {
        info!(
            id = self.id,
            instance_id = self.instance_id,
            "starting common subset"
        );

        // Propose our own value on the slot we lead.
        self.rbc
            .init(input, self.rbc_session(self.id), net.clone())
            .await?;

        // Drive one agreement instance per slot. The drivers outlive the
        // decisions (they keep confirming until quiescent), so they are
        // reaped at the end.
        let mut ba_drivers = Vec::with_capacity(self.n);
        for slot in 0..self.n {
            let this = self.clone();
            let net = net.clone();
            ba_drivers.push(tokio::spawn(async move {
                let session_id = this.ba_session(slot);
                if let Err(e) = this.ba.run(session_id, &this.coin, net).await {
                    warn!(
                        id = this.id,
                        session_id = session_id.as_u64(),
                        error = ?e,
                        "agreement driver failed"
                    );
                }
            }));
        }

        // A slot whose broadcast delivers is voted into the subset.
        let mut rbc_watchers: Vec<JoinHandle<()>> = Vec::with_capacity(self.n);
        for slot in 0..self.n {
            let this = self.clone();
            rbc_watchers.push(tokio::spawn(async move {
                let value = this.rbc.wait_output(this.rbc_session(slot)).await;
                let mut store = this.store.lock().await;
                store.set_rbc_value(slot, value);
                if !store.has_aba_inputted(slot) {
                    store.set_aba_inputted(slot);
                    drop(store);
                    this.ba.provide_input(this.ba_session(slot), true).await;
                }
            }));
        }

        // Once n - f slots are in, vote the laggards out so that agreement
        // instances whose leader stays silent terminate as well.
        let mut aba_watchers = Vec::with_capacity(self.n);
        for slot in 0..self.n {
            let this = self.clone();
            aba_watchers.push(tokio::spawn(async move {
                let value = this.ba.wait_decision(this.ba_session(slot)).await;
                debug!(
                    id = this.id,
                    slot,
                    value = value as u8,
                    "agreement instance decided"
                );
                let mut store = this.store.lock().await;
                store.set_aba_value(slot, value);
                if store.ones_count() >= this.n - this.f {
                    let missing: Vec<usize> = (0..this.n)
                        .filter(|&k| !store.has_aba_inputted(k))
                        .collect();
                    for &k in &missing {
                        store.set_aba_inputted(k);
                    }
                    drop(store);
                    for k in missing {
                        this.ba.provide_input(this.ba_session(k), false).await;
                    }
                }
            }));
        }

        // Wait for all agreement instances to decide.
        let mut joined = true;
        for slot in 0..aba_watchers.len() {
            if (&mut aba_watchers[slot]).await.is_err() {
                joined = false;
                break;
            }
        }
        if !joined {
            self.reap(&ba_drivers, &rbc_watchers, &aba_watchers);
            return Err(AcsError::JoinError);
        }

        let ones = self.store.lock().await.ones_count();
        if ones < self.n - self.f {
            self.reap(&ba_drivers, &rbc_watchers, &aba_watchers);
            return Err(AcsError::TooFewOnes(ones, self.n - self.f));
        }

        // Collect the broadcasts of the included slots; a slot the agreement
        // excluded may never deliver, its watcher is dropped mid-flight.
        let mut result = Vec::with_capacity(self.n);
        for slot in 0..self.n {
            let included = self.store.lock().await.aba_value(slot) == Some(true);
            if included {
                if (&mut rbc_watchers[slot]).await.is_err() {
                    joined = false;
                    break;
                }
                result.push(self.store.lock().await.rbc_value(slot));
            } else {
                result.push(None);
            }
        }

        // The decided agreement instances keep looping until they confirm
        // their decision a second time, and the excluded watchers may wait
        // forever; all their work is done, stop them.
        self.reap(&ba_drivers, &rbc_watchers, &aba_watchers);
        if !joined {
            return Err(AcsError::JoinError);
        }

        info!(
            id = self.id,
            instance_id = self.instance_id,
            included = result.iter().filter(|v| v.is_some()).count(),
            "common subset complete"
        );
        Ok(result)
    }

    /// Aborts every task this run spawned; finished tasks ignore it.
    fn reap(
        &self,
        ba_drivers: &[JoinHandle<()>],
        rbc_watchers: &[JoinHandle<()>],
        aba_watchers: &[JoinHandle<()>],
    ) {
        for task in ba_drivers.iter().chain(rbc_watchers).chain(aba_watchers) {
            task.abort();
        }
    }
}
