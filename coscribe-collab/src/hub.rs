//! Document hub: the one process-wide owner of live document sessions.
//!
//! Maps `doc_id → router mailbox`, spawning a router on first join and
//! forgetting it after the router's final flush. Constructed once at
//! process start and passed around by `Arc` — there are no ambient
//! globals.
//!
//! The join/drain race is settled by the room-map lock: joins are sent
//! into a mailbox while holding the read lock, and a router only commits
//! to draining while holding the write lock (absorbing any queued
//! messages first). A join therefore either reaches a router that will
//! process it, or finds the room gone and spawns a fresh one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::access::Identity;
use crate::protocol::ClientFrame;
use crate::router::{run_document, RoomMap, RouterConfig, RouterMsg};
use crate::session::OutboundSender;
use crate::storage::ContentStore;

/// Owner of every live document session in the process.
pub struct DocumentHub {
    rooms: RoomMap,
    store: Arc<dyn ContentStore>,
    config: RouterConfig,
}

impl DocumentHub {
    pub fn new(store: Arc<dyn ContentStore>, config: RouterConfig) -> Arc<Self> {
        Arc::new(Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            store,
            config,
        })
    }

    /// Attach a participant to a document, activating it if needed.
    pub async fn join(&self, doc_id: Uuid, identity: Identity, channel: OutboundSender) {
        loop {
            {
                let rooms = self.rooms.read().await;
                if let Some(mailbox) = rooms.get(&doc_id) {
                    let msg = RouterMsg::Join {
                        identity: identity.clone(),
                        channel: channel.clone(),
                    };
                    if mailbox.send(msg).await.is_ok() {
                        return;
                    }
                    // Router gone without unregistering (shutdown path);
                    // fall through and respawn.
                }
            }

            let mut rooms = self.rooms.write().await;
            // Lost a spawn race: another task created the router while we
            // waited for the write lock. Retry the send path.
            if rooms.get(&doc_id).is_some_and(|m| !m.is_closed()) {
                continue;
            }
            let (mailbox, inbox) = mpsc::channel(self.config.mailbox_capacity);
            rooms.insert(doc_id, mailbox.clone());
            tokio::spawn(run_document(
                doc_id,
                self.store.clone(),
                self.config.clone(),
                inbox,
                self.rooms.clone(),
            ));
            // Fresh mailbox; the send cannot fail.
            let _ = mailbox
                .send(RouterMsg::Join {
                    identity: identity.clone(),
                    channel: channel.clone(),
                })
                .await;
            return;
        }
    }

    /// Forward a decoded frame to the document's router. Dropped silently
    /// when the document is no longer live (connection racing teardown).
    pub async fn submit(&self, doc_id: Uuid, from: Uuid, frame: ClientFrame) {
        let rooms = self.rooms.read().await;
        if let Some(mailbox) = rooms.get(&doc_id) {
            if mailbox.send(RouterMsg::Frame { from, frame }).await.is_err() {
                log::debug!("doc {doc_id}: frame from {from} arrived after unload");
            }
        }
    }

    /// Detach a participant (connection closed or failed). `channel` is the
    /// leaving connection's outbound sender, so a teardown racing a
    /// reconnect cannot deregister the new session.
    pub async fn leave(&self, doc_id: Uuid, participant_id: Uuid, channel: OutboundSender) {
        let rooms = self.rooms.read().await;
        if let Some(mailbox) = rooms.get(&doc_id) {
            let _ = mailbox
                .send(RouterMsg::Leave {
                    participant_id,
                    channel,
                })
                .await;
        }
    }

    /// Number of currently loaded documents.
    pub async fn document_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Ids of currently loaded documents.
    pub async fn active_documents(&self) -> Vec<Uuid> {
        self.rooms.read().await.keys().copied().collect()
    }

    /// The content store this hub persists through.
    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }
}
