use super::{CoinError, CoinMessage};
use crate::agreement::{SessionId, WrappedMessage};
use crate::net::{Network, PartyId};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, sync::Arc};
use threshold_crypto::{PublicKeySet, SecretKeySet, SecretKeyShare, SignatureShare};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

///--------------------------Common coin--------------------------
///
/// A shared coin based on threshold signatures:
/// 1. Every party signs the coin name (session id || round) with its secret
///    key share and broadcasts the signature share.
/// 2. On receiving a share, verify it against the sender's public key share;
///    an invalid or duplicate share is skipped, never fatal.
/// 3. Once f + 1 valid shares for a round are recorded, combine them into the
///    group signature and derive the coin bit from its hash.
///
/// Any f + 1 valid shares combine to the same unique group signature, so two
/// parties combining different share subsets still obtain the same bit.
#[derive(Clone)]
pub struct CommonCoin {
    pub id: PartyId, // The ID of this party
    pub n: usize,    // Total number of parties in the network
    pub f: usize,    // Number of allowed malicious parties
    pk: PublicKeySet,
    sk: Arc<SecretKeyShare>,
    pub store: Arc<Mutex<HashMap<SessionId, Arc<Mutex<CoinStore>>>>>, // Stores the session state
}

impl CommonCoin {
    /// Creates a new coin instance. The key set must combine exactly f + 1
    /// shares so that one honest share is always part of any quorum.
    pub fn new(
        id: PartyId,
        n: usize,
        f: usize,
        pk: PublicKeySet,
        sk: SecretKeyShare,
    ) -> Result<Self, CoinError> {
        if pk.threshold() != f {
            return Err(CoinError::InvalidThreshold(pk.threshold(), f + 1));
        }
        Ok(Self {
            id,
            n,
            f,
            pk,
            sk: Arc::new(sk),
            store: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    //The message every party signs for a given round: session id || round
    fn coin_name(session_id: SessionId, round: u32) -> Vec<u8> {
        let mut name = session_id.as_u64().to_be_bytes().to_vec();
        name.extend_from_slice(&round.to_be_bytes());
        name
    }

    /// This party's signature share over the coin name of a round.
    pub fn share_message(&self, session_id: SessionId, round: u32) -> CoinMessage {
        let name = Self::coin_name(session_id, round);
        let share = self.sk.sign(&name);
        CoinMessage::new(session_id, self.id, round, share.to_bytes().to_vec())
    }

    /// Broadcasts this party's signature share for the round and blocks until
    /// the receive side has combined f + 1 shares. Rounds that were already
    /// combined resolve immediately from the cache.
    pub async fn get_coin<N: Network + Send + Sync>(
        &self,
        session_id: SessionId,
        round: u32,
        net: Arc<N>,
    ) -> Result<bool, CoinError> {
        let msg = self.share_message(session_id, round);
        debug!(
            id = self.id,
            session_id = session_id.as_u64(),
            round,
            "broadcasting coin share"
        );
        self.broadcast(msg, net).await?;

        let session_store = self.get_or_create_store(session_id).await;
        loop {
            let notify = {
                let store = session_store.lock().await;
                if let Some(bit) = store.coin(round) {
                    return Ok(bit);
                }
                store.notify.clone()
            };
            notify.notified().await;
        }
    }

    /// Processes a signature share received from another party. Bad shares
    /// are counted as if the sender were simply slow.
    pub async fn process(&self, msg: CoinMessage) -> Result<(), CoinError> {
        if msg.sender >= self.n {
            return Err(CoinError::UnknownSender(msg.sender, self.n));
        }

        let session_store = self.get_or_create_store(msg.session_id).await;
        let mut store = session_store.lock().await;

        if store.coin(msg.round).is_some() {
            // Late share for an already combined round.
            return Ok(());
        }
        if store.has_share(msg.round, msg.sender) {
            debug!(
                id = self.id,
                session_id = msg.session_id.as_u64(),
                sender = msg.sender,
                round = msg.round,
                "redundant coin share received, skipping"
            );
            return Ok(());
        }

        let share_bytes: &[u8; 96] = match msg.share.as_slice().try_into() {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!(
                    id = self.id,
                    sender = msg.sender,
                    round = msg.round,
                    "invalid signature share size, skipping"
                );
                return Ok(());
            }
        };
        let share = match SignatureShare::from_bytes(share_bytes) {
            Ok(share) => share,
            Err(_) => {
                warn!(
                    id = self.id,
                    sender = msg.sender,
                    round = msg.round,
                    "failed to deserialize signature share, skipping"
                );
                return Ok(());
            }
        };

        let name = Self::coin_name(msg.session_id, msg.round);
        if !self.pk.public_key_share(msg.sender).verify(&share, &name) {
            warn!(
                id = self.id,
                session_id = msg.session_id.as_u64(),
                sender = msg.sender,
                round = msg.round,
                "signature share failed verification, skipping"
            );
            return Ok(());
        }

        store.insert_share(msg.round, msg.sender, share);

        // After reaching the threshold, compute the coin and make it
        // available locally.
        if store.share_count(msg.round) == self.f + 1 {
            let bit = {
                let shares = store.shares(msg.round);
                let signature = self
                    .pk
                    .combine_signatures(shares)
                    .map_err(|e| CoinError::CombineFailed(msg.round, e.to_string()))?;
                // Individually valid shares always combine to a valid
                // signature; a failure here is a bug, not a Byzantine input.
                if !self.pk.public_key().verify(&signature, &name) {
                    return Err(CoinError::CombinedSignatureInvalid(msg.round));
                }
                Sha256::digest(signature.to_bytes())[0] & 1 == 1
            };
            info!(
                id = self.id,
                session_id = msg.session_id.as_u64(),
                round = msg.round,
                coin = bit,
                "combined and verified group signature"
            );
            store.set_coin(msg.round, bit);
        }
        Ok(())
    }

    async fn broadcast<N: Network + Send + Sync>(
        &self,
        msg: CoinMessage,
        net: Arc<N>,
    ) -> Result<(), CoinError> {
        let wrapped = WrappedMessage::Coin(msg);
        let encoded = bincode::serialize(&wrapped).map_err(CoinError::SerializationError)?;
        net.broadcast(&encoded)
            .await
            .map_err(CoinError::NetworkError)?;
        Ok(())
    }

    async fn get_or_create_store(&self, session_id: SessionId) -> Arc<Mutex<CoinStore>> {
        let mut store = self.store.lock().await;
        // Get or create the session state for the current session.
        store
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(CoinStore::default())))
            .clone()
    }
}

/// Stores the internal state for each common coin session at a party.
#[derive(Default)]
pub struct CoinStore {
    pub shares: HashMap<u32, HashMap<PartyId, SignatureShare>>, // round => sender => verified share
    pub coins: HashMap<u32, bool>,                              // round => combined coin
    pub notify: Arc<Notify>, // wakes the single get_coin waiter of this session
}

impl CoinStore {
    /// Check if a sender has already delivered a share in a given round.
    pub fn has_share(&self, round: u32, sender: PartyId) -> bool {
        self.shares
            .get(&round)
            .map(|senders| senders.contains_key(&sender))
            .unwrap_or(false)
    }

    /// Insert a verified signature share for a given round.
    pub fn insert_share(&mut self, round: u32, sender: PartyId, share: SignatureShare) {
        self.shares
            .entry(round)
            .or_insert_with(HashMap::new)
            .insert(sender, share);
    }

    /// Get the current share count for a round.
    pub fn share_count(&self, round: u32) -> usize {
        self.shares.get(&round).map(|s| s.len()).unwrap_or(0)
    }

    /// Get the collected shares for a round.
    pub fn shares(&self, round: u32) -> Vec<(PartyId, &SignatureShare)> {
        self.shares
            .get(&round)
            .map(|senders| senders.iter().map(|(&i, s)| (i, s)).collect())
            .unwrap_or_default()
    }

    //Cache the combined coin and wake the waiter
    pub fn set_coin(&mut self, round: u32, value: bool) {
        self.coins.insert(round, value);
        self.notify.notify_one();
    }

    /// Get the coin value for a given round, if it exists.
    pub fn coin(&self, round: u32) -> Option<bool> {
        self.coins.get(&round).copied()
    }
}

/// Mock trusted dealer for testing.
/// Might replace with a DKG.
pub struct Dealer {
    n: usize,
    f: usize,
}

impl Dealer {
    pub fn new(n: usize, f: usize) -> Self {
        Dealer { n, f }
    }

    /// Performs key generation, returning the public key set and one secret
    /// key share per party.
    pub fn deal(&self) -> (PublicKeySet, Vec<SecretKeyShare>) {
        let mut rng = rand::thread_rng();
        let skset = SecretKeySet::random(self.f, &mut rng);
        let pkset = skset.public_keys();
        let shares = (0..self.n).map(|i| skset.secret_key_share(i)).collect();
        (pkset, shares)
    }
}
