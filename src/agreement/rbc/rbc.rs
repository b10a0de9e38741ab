use super::{
    rbc_store::{BrachaStore, RbcMessage, RbcMsgType},
    RbcError,
};
use crate::agreement::{SessionId, WrappedMessage};
use crate::net::{Network, PartyId};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info};

///--------------------------Bracha RBC--------------------------
///
/// Protocol works as follows (m is the message to broadcast):
/// 1. Initiator sends (INIT, m)
/// 2. Party on receiving (INIT, m) and hasn't sent (ECHO, m), sends (ECHO, m)
/// 3. Party on receiving 2f+1 (ECHO, m) and hasn't sent:
///     a. (ECHO, m)  -> sends (ECHO, m)
///     b. (READY, m) -> sends (READY, m)
/// 4. Party on receiving f+1 (READY, m) and hasn't sent:
///     a. (ECHO, m)  -> sends (ECHO, m)
///     b. (READY, m) -> sends (READY, m)
/// 5. Party on receiving 2f+1 (READY, m) delivers m and terminates
#[derive(Clone)]
pub struct Bracha {
    pub id: PartyId, // The ID of this party
    pub n: usize,    // Total number of parties in the network
    pub f: usize,    // Number of allowed malicious parties
    pub store: Arc<Mutex<HashMap<SessionId, Arc<Mutex<BrachaStore>>>>>, // Stores the session state
}

impl Bracha {
    /// Creates a new Bracha instance with the given parameters.
    pub fn new(id: PartyId, n: usize, f: usize) -> Result<Self, RbcError> {
        if !(f < (n + 2) / 3) {
            // ceil(n / 3)
            return Err(RbcError::InvalidThreshold(f, n));
        }
        Ok(Bracha {
            id,
            n,
            f,
            store: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// This initiates the Bracha protocol; called only by the session leader.
    pub async fn init<N: Network + Send + Sync>(
        &self,
        payload: Vec<u8>,
        session_id: SessionId,
        net: Arc<N>,
    ) -> Result<(), RbcError> {
        let msg = RbcMessage::new(session_id, self.id, RbcMsgType::Init, payload);
        info!(
            id = self.id,
            session_id = session_id.as_u64(),
            msg_type = "INIT",
            "Broadcasting INIT message"
        );
        self.broadcast(msg, net).await?;
        Ok(())
    }

    /// Blocks until this session has delivered and returns the delivered
    /// value. Never resolves for a session whose leader stays silent, so
    /// callers must be cancellable while waiting.
    pub async fn wait_output(&self, session_id: SessionId) -> Vec<u8> {
        let session_store = self.get_or_create_store(session_id).await;
        loop {
            let notify = {
                let store = session_store.lock().await;
                if let Some(output) = &store.output {
                    return output.clone();
                }
                store.notify.clone()
            };
            notify.notified().await;
        }
    }

    /// Processes incoming messages based on their type.
    pub async fn process<N: Network + Send + Sync>(
        &self,
        msg: RbcMessage,
        net: Arc<N>,
    ) -> Result<(), RbcError> {
        if msg.sender >= self.n {
            return Err(RbcError::UnknownSender(msg.sender, self.n));
        }
        match &msg.kind {
            RbcMsgType::Init => self.init_handler(msg, net).await,
            RbcMsgType::Echo => self.echo_handler(msg, net).await,
            RbcMsgType::Ready => self.ready_handler(msg, net).await,
        }
    }

    /// Handles the "INIT" message. Responds by broadcasting an "ECHO" message
    /// if necessary.
    async fn init_handler<N: Network + Send + Sync>(
        &self,
        msg: RbcMessage,
        net: Arc<N>,
    ) -> Result<(), RbcError> {
        let session_store = self.get_or_create_store(msg.session_id).await;
        let mut store = session_store.lock().await;

        // Only broadcast the ECHO if it hasn't already been sent.
        if !store.echo {
            store.mark_echo();
            let new_msg =
                RbcMessage::new(msg.session_id, self.id, RbcMsgType::Echo, msg.payload);
            debug!(
                id = self.id,
                session_id = new_msg.session_id.as_u64(),
                msg_type = "ECHO",
                "Broadcasting ECHO in response to INIT"
            );
            drop(store);
            self.broadcast(new_msg, net).await?;
        }
        Ok(())
    }

    /// Handles the "ECHO" message. If the threshold of echoes is met, a
    /// "READY" message is broadcast.
    async fn echo_handler<N: Network + Send + Sync>(
        &self,
        msg: RbcMessage,
        net: Arc<N>,
    ) -> Result<(), RbcError> {
        let session_store = self.get_or_create_store(msg.session_id).await;
        let mut store = session_store.lock().await;

        // A late message for a delivered session carries no new information.
        if store.ended {
            debug!(
                id = self.id,
                session_id = msg.session_id.as_u64(),
                "Session already ended, ignoring ECHO"
            );
            return Ok(());
        }

        // If this sender has not already sent an ECHO, process it.
        if !store.has_echo(msg.sender) {
            store.set_echo_sent(msg.sender);
            store.increment_echo(&msg.payload);
            let count = store.get_echo_count(&msg.payload);
            // If the threshold for receiving echoes is met, broadcast READY.
            if count >= 2 * self.f + 1 {
                if !store.ready {
                    store.mark_ready();
                    let new_msg = RbcMessage::new(
                        msg.session_id,
                        self.id,
                        RbcMsgType::Ready,
                        msg.payload.clone(),
                    );
                    debug!(
                        id = self.id,
                        session_id = msg.session_id.as_u64(),
                        msg_type = "READY",
                        "Broadcasting READY after ECHO threshold met"
                    );
                    self.broadcast(new_msg, net.clone()).await?;
                }
                // If ECHO hasn't been sent yet, broadcast it as well.
                if !store.echo {
                    store.mark_echo();
                    let new_msg = RbcMessage::new(
                        msg.session_id,
                        self.id,
                        RbcMsgType::Echo,
                        msg.payload,
                    );
                    debug!(
                        id = self.id,
                        session_id = new_msg.session_id.as_u64(),
                        msg_type = "ECHO",
                        "Re-broadcasting ECHO due to threshold"
                    );
                    drop(store);
                    self.broadcast(new_msg, net).await?;
                }
            }
        }
        Ok(())
    }

    /// Handles the "READY" message. If the threshold is met, the session ends
    /// and the output is delivered.
    async fn ready_handler<N: Network + Send + Sync>(
        &self,
        msg: RbcMessage,
        net: Arc<N>,
    ) -> Result<(), RbcError> {
        let session_store = self.get_or_create_store(msg.session_id).await;
        let mut store = session_store.lock().await;

        if store.ended {
            debug!(
                id = self.id,
                session_id = msg.session_id.as_u64(),
                "Session already ended, ignoring READY"
            );
            return Ok(());
        }

        // If this sender hasn't sent READY yet, process it.
        if !store.has_ready(msg.sender) {
            store.set_ready_sent(msg.sender);
            store.increment_ready(&msg.payload);
            let count = store.get_ready_count(&msg.payload);

            if count >= self.f + 1 && count < 2 * self.f + 1 {
                // Amplify the READY so slow parties reach the threshold too.
                if !store.ready {
                    store.mark_ready();
                    let new_msg = RbcMessage::new(
                        msg.session_id,
                        self.id,
                        RbcMsgType::Ready,
                        msg.payload.clone(),
                    );
                    debug!(
                        id = self.id,
                        session_id = msg.session_id.as_u64(),
                        msg_type = "READY",
                        "Broadcasting READY after f+1 threshold"
                    );
                    self.broadcast(new_msg, net.clone()).await?;
                }
                if !store.echo {
                    store.mark_echo();
                    let new_msg = RbcMessage::new(
                        msg.session_id,
                        self.id,
                        RbcMsgType::Echo,
                        msg.payload,
                    );
                    debug!(
                        id = self.id,
                        session_id = new_msg.session_id.as_u64(),
                        msg_type = "ECHO",
                        "Broadcasting ECHO along with READY"
                    );
                    drop(store);
                    self.broadcast(new_msg, net).await?;
                }
            } else if count >= 2 * self.f + 1 {
                // Agreement is reached; deliver the value and end the session.
                store.mark_ended();
                store.set_output(msg.payload.clone());
                info!(
                    id = self.id,
                    session_id = msg.session_id.as_u64(),
                    "Agreement achieved; RBC instance delivered"
                );
            }
        }
        Ok(())
    }

    async fn broadcast<N: Network + Send + Sync>(
        &self,
        msg: RbcMessage,
        net: Arc<N>,
    ) -> Result<(), RbcError> {
        let wrap_msg = WrappedMessage::Rbc(msg);
        let encoded = bincode::serialize(&wrap_msg).map_err(RbcError::SerializationError)?;
        net.broadcast(&encoded)
            .await
            .map_err(RbcError::NetworkError)?;
        Ok(())
    }

    async fn get_or_create_store(&self, session_id: SessionId) -> Arc<Mutex<BrachaStore>> {
        let mut store = self.store.lock().await;
        // Get or create the session state for the current session.
        store
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(BrachaStore::default())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_params() {
        assert!(Bracha::new(0, 4, 1).is_ok());
        assert!(Bracha::new(1, 7, 2).is_ok());
        assert!(Bracha::new(2, 3, 0).is_ok());
    }

    #[test]
    fn test_invalid_threshold() {
        let bracha = Bracha::new(0, 4, 2);
        assert!(bracha.is_err(), "Expected invalid f to fail");
        if let Err(e) = bracha {
            assert!(e.to_string().contains("f="));
        }
    }
}
