//! Per-document serial pipeline.
//!
//! Every live document has exactly one router task. All participants'
//! frames funnel into its mailbox, so mutations of the document's
//! [`ReplicatedSequence`] and [`SessionRegistry`] are strictly serialized
//! and every participant observes deltas in the same relative order.
//! Documents are fully independent — no lock is shared between them.
//!
//! Lifecycle:
//! ```text
//! UNLOADED ──first join──► ACTIVE ──last leave──► DRAINING ──flush──► UNLOADED
//!                            │  ▲
//!              frames, ticks └──┘
//! ```
//!
//! Failure policy: an unusable operation (out-of-range index, empty batch)
//! is dropped with no state change and no signal to other participants; a
//! storage failure is logged and retried on the next tick; nothing that
//! happens while processing one frame can take the session down for the
//! rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use coscribe_text::{Character, DocumentSnapshot, ReplicatedSequence};

use crate::access::Identity;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::session::{OutboundSender, SessionRegistry};
use crate::storage::{decode_snapshot, encode_snapshot, ContentStore};

/// Messages accepted by a document router.
#[derive(Debug)]
pub enum RouterMsg {
    /// A participant was admitted by the transport.
    Join {
        identity: Identity,
        channel: OutboundSender,
    },
    /// A decoded frame from a connected participant.
    Frame { from: Uuid, frame: ClientFrame },
    /// A participant's connection ended. Carries the connection's channel
    /// so a stale teardown cannot deregister a fresh reconnect under the
    /// same participant id.
    Leave {
        participant_id: Uuid,
        channel: OutboundSender,
    },
}

/// Tunables shared by the hub and its routers.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Periodic flush/sweep interval.
    pub save_interval: Duration,
    /// Idle window after which a participant is evicted.
    pub away_timeout: Duration,
    /// Mailbox depth per document.
    pub mailbox_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            save_interval: Duration::from_secs(10),
            away_timeout: crate::session::AWAY_WINDOW,
            mailbox_capacity: 256,
        }
    }
}

/// Shared map of live routers, owned by the hub.
pub(crate) type RoomMap = Arc<RwLock<HashMap<Uuid, mpsc::Sender<RouterMsg>>>>;

/// Run one document session to completion.
///
/// Spawned by the hub on first join; removes itself from `rooms` after the
/// final flush. The drain decision happens under the room-map write lock,
/// and joins are sent under its read lock, so a join can never slip into a
/// mailbox the router has stopped reading.
pub(crate) async fn run_document(
    doc_id: Uuid,
    store: Arc<dyn ContentStore>,
    config: RouterConfig,
    mut mailbox: mpsc::Receiver<RouterMsg>,
    rooms: RoomMap,
) {
    let mut state = DocumentState::load(doc_id, store);
    log::info!(
        "document {doc_id} active (version {}, {} chars)",
        state.version,
        state.sequence.len()
    );

    let mut save_timer = tokio::time::interval(config.save_interval);
    save_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    save_timer.tick().await; // first tick is immediate; skip it

    loop {
        tokio::select! {
            msg = mailbox.recv() => match msg {
                Some(msg) => state.handle(msg),
                None => break,
            },
            _ = save_timer.tick() => state.on_tick(config.away_timeout),
        }

        if state.started && state.registry.is_empty() {
            // DRAINING. The room map must be write-locked so no join can be
            // sent concurrently; try_write instead of write, because a
            // sender blocked on a full mailbox would hold the read lock and
            // wait for us to consume — the next tick retries. Anything
            // already queued is absorbed first and can abort the drain.
            if let Ok(mut rooms_w) = rooms.try_write() {
                while let Ok(msg) = mailbox.try_recv() {
                    state.handle(msg);
                }
                if state.registry.is_empty() {
                    state.final_flush();
                    rooms_w.remove(&doc_id);
                    log::info!("document {doc_id} unloaded at version {}", state.version);
                    return;
                }
            }
        }
    }

    // Mailbox closed from outside (hub shutdown): flush and unregister.
    state.final_flush();
    rooms.write().await.remove(&doc_id);
}

/// All state owned by one document's router task.
struct DocumentState {
    doc_id: Uuid,
    sequence: ReplicatedSequence,
    registry: SessionRegistry,
    store: Arc<dyn ContentStore>,
    /// Committed content version; increments per accepted mutation.
    version: u64,
    /// Storage write generation last acknowledged by the store.
    generation: u64,
    /// Unpersisted mutations exist (a failed write leaves this set).
    dirty: bool,
    /// At least one participant has ever joined.
    started: bool,
}

impl DocumentState {
    /// Load the persisted snapshot, or fall back to the empty document when
    /// nothing (or something unreadable) is stored.
    fn load(doc_id: Uuid, store: Arc<dyn ContentStore>) -> Self {
        let (snapshot, generation) = match store.load_content(doc_id) {
            Ok(Some(stored)) => match decode_snapshot(&stored.blob) {
                Ok(snapshot) => (snapshot, stored.generation),
                Err(e) => {
                    log::warn!("doc {doc_id}: stored content unreadable ({e}), starting empty");
                    (DocumentSnapshot::empty(), stored.generation)
                }
            },
            Ok(None) => (DocumentSnapshot::empty(), 0),
            Err(e) => {
                log::error!("doc {doc_id}: load failed ({e}), starting empty");
                (DocumentSnapshot::empty(), 0)
            }
        };

        let version = snapshot.version;
        Self {
            doc_id,
            sequence: ReplicatedSequence::from_snapshot(&snapshot, doc_id),
            registry: SessionRegistry::new(),
            store,
            version,
            generation,
            dirty: false,
            started: false,
        }
    }

    fn handle(&mut self, msg: RouterMsg) {
        match msg {
            RouterMsg::Join { identity, channel } => self.on_join(identity, channel),
            RouterMsg::Frame { from, frame } => self.on_frame(from, frame),
            RouterMsg::Leave {
                participant_id,
                channel,
            } => self.on_leave(participant_id, &channel),
        }
    }

    fn on_join(&mut self, identity: Identity, channel: OutboundSender) {
        self.started = true;
        let participant_id = identity.user_id;
        let summary = self
            .registry
            .join(participant_id, identity.username.clone(), channel);

        let init = ServerFrame::Init {
            document_id: self.doc_id,
            participant_id,
            state: self.sequence.to_snapshot(self.version),
            cursors: self.registry.cursor_map(),
            presence: self.registry.list_presence(),
        };
        self.send_to(participant_id, &init);
        self.fan_out(participant_id, &ServerFrame::PresenceJoin { participant: summary });
        log::info!(
            "doc {}: {} ({participant_id}) joined, {} connected",
            self.doc_id,
            identity.username,
            self.registry.len()
        );
    }

    fn on_leave(&mut self, participant_id: Uuid, channel: &OutboundSender) {
        let is_current = self
            .registry
            .channel_of(participant_id)
            .is_some_and(|current| current.same_channel(channel));
        if !is_current {
            // The participant reconnected before this teardown arrived.
            return;
        }
        if self.registry.leave(participant_id) {
            self.fan_out(participant_id, &ServerFrame::PresenceLeave { participant_id });
            log::info!(
                "doc {}: {participant_id} left, {} connected",
                self.doc_id,
                self.registry.len()
            );
        }
    }

    fn on_frame(&mut self, from: Uuid, frame: ClientFrame) {
        if !self.registry.contains(from) {
            log::debug!("doc {}: frame from unknown participant {from}, dropped", self.doc_id);
            return;
        }
        // Any frame counts as activity for presence purposes.
        self.registry.update_heartbeat(from);

        match frame {
            ClientFrame::Insert { index, value } => {
                let ch = self.sequence.insert_as(from, index, value);
                self.commit(from, vec![ch]);
            }
            ClientFrame::Delete { index } => match self.sequence.delete(index) {
                Some(ch) => self.commit(from, vec![ch]),
                None => log::debug!(
                    "doc {}: delete at {index} out of range, dropped",
                    self.doc_id
                ),
            },
            ClientFrame::Paste { index, text } => {
                if text.is_empty() {
                    return;
                }
                let characters: Vec<Character> = text
                    .chars()
                    .enumerate()
                    .map(|(i, value)| self.sequence.insert_as(from, index + i, value))
                    .collect();
                self.commit(from, characters);
            }
            ClientFrame::Cut {
                start_index,
                end_index,
            } => {
                if start_index >= end_index {
                    return;
                }
                let mut removed = Vec::new();
                // Visible indices shift left as we tombstone, so the cut
                // keeps deleting at start_index.
                for _ in start_index..end_index {
                    match self.sequence.delete(start_index) {
                        Some(ch) => removed.push(ch),
                        None => break,
                    }
                }
                if removed.is_empty() {
                    return;
                }
                self.commit(from, removed);
            }
            ClientFrame::Cursor { position } => {
                self.registry.update_cursor(from, position);
                self.fan_out(
                    from,
                    &ServerFrame::Cursor {
                        participant_id: from,
                        position,
                    },
                );
            }
            ClientFrame::Heartbeat => {}
            ClientFrame::SyncRequest => {
                let response = ServerFrame::SyncResponse {
                    document_id: self.doc_id,
                    state: self.sequence.to_snapshot(self.version),
                    cursors: self.registry.cursor_map(),
                    version: self.version,
                };
                self.send_to(from, &response);
            }
        }
    }

    /// Seal one accepted content mutation: bump the version, fan the deltas
    /// out to everyone else, and write through immediately.
    fn commit(&mut self, origin: Uuid, characters: Vec<Character>) {
        self.version += 1;
        self.dirty = true;
        self.fan_out(
            origin,
            &ServerFrame::Update {
                origin,
                version: self.version,
                characters,
            },
        );
        self.flush();
    }

    /// Periodic tick: evict the inactive, retry any unpersisted state.
    fn on_tick(&mut self, away_timeout: Duration) {
        for evicted in self.registry.sweep_inactive(away_timeout) {
            log::info!("doc {}: {evicted} evicted as inactive", self.doc_id);
            self.fan_out(evicted, &ServerFrame::PresenceLeave { participant_id: evicted });
        }
        if self.dirty {
            self.flush();
        }
    }

    /// Flush on the way out of ACTIVE; a no-op when every immediate write
    /// already landed.
    fn final_flush(&mut self) {
        if self.dirty {
            self.flush();
        }
    }

    /// Write the current snapshot through the content store. Failures are
    /// logged and leave `dirty` set so the next tick retries; the live
    /// editing path never sees them.
    fn flush(&mut self) {
        let snapshot = self.sequence.to_snapshot(self.version);
        let blob = match encode_snapshot(&snapshot) {
            Ok(blob) => blob,
            Err(e) => {
                log::error!("doc {}: snapshot encode failed: {e}", self.doc_id);
                return;
            }
        };
        match self.store.save_content(self.doc_id, &blob, self.generation) {
            Ok(generation) => {
                self.generation = generation;
                self.dirty = false;
                log::debug!(
                    "doc {}: persisted version {} (generation {generation})",
                    self.doc_id,
                    self.version
                );
            }
            Err(e) => {
                log::error!("doc {}: persist failed, will retry: {e}", self.doc_id);
            }
        }
    }

    /// Queue a frame to one participant.
    fn send_to(&self, target: Uuid, frame: &ServerFrame) {
        let encoded = match frame.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                log::error!("doc {}: frame encode failed: {e}", self.doc_id);
                return;
            }
        };
        if let Some(channel) = self.registry.channel_of(target) {
            if channel.try_send(Arc::from(encoded.as_str())).is_err() {
                log::warn!("doc {}: outbound queue for {target} unavailable", self.doc_id);
            }
        }
    }

    /// Queue a frame to every participant except `exclude`. A full or
    /// closed queue drops the frame for that participant only; their
    /// reader/writer teardown delivers the eventual Leave.
    fn fan_out(&self, exclude: Uuid, frame: &ServerFrame) {
        let encoded = match frame.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                log::error!("doc {}: frame encode failed: {e}", self.doc_id);
                return;
            }
        };
        let shared: Arc<str> = Arc::from(encoded.as_str());
        for (target, channel) in self.registry.others(exclude) {
            if channel.try_send(shared.clone()).is_err() {
                log::warn!("doc {}: dropping frame for lagging participant {target}", self.doc_id);
            }
        }
    }
}
