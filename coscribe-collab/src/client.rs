//! WebSocket client for the collab server.
//!
//! Maintains a local mirror [`ReplicatedSequence`] that `init`, `update`
//! and `sync_response` frames are applied to, and surfaces everything else
//! as typed [`ClientEvent`]s. Integration tests drive two of these against
//! a live server to prove end-to-end convergence; an editor front end
//! would sit on the same API.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use coscribe_text::ReplicatedSequence;

use crate::protocol::{ClientFrame, ProtocolError, ServerFrame};
use crate::session::PresenceSummary;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// Server refused or closed the connection with a close frame.
    Closed { code: Option<u16>, reason: String },
    /// Initial state applied to the mirror, with the current roster.
    Initialized {
        text: String,
        version: u64,
        presence: Vec<PresenceSummary>,
        cursors: std::collections::HashMap<Uuid, usize>,
    },
    /// A remote participant's deltas were applied to the mirror.
    RemoteUpdate { origin: Uuid, version: u64, text: String },
    RemoteCursor { participant_id: Uuid, position: usize },
    PresenceJoined(PresenceSummary),
    PresenceLeft(Uuid),
    /// Reply to our `sync_request`; the mirror has been replaced.
    SyncResponded { version: u64, text: String },
}

#[derive(Default)]
struct Mirror {
    sequence: Option<ReplicatedSequence>,
    version: u64,
    participant_id: Option<Uuid>,
}

/// The collaborating client.
pub struct CollabClient {
    server_url: String,
    doc_id: Uuid,
    token: Option<String>,
    state: Arc<RwLock<ConnectionState>>,
    mirror: Arc<Mutex<Mirror>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl CollabClient {
    /// Create a client for one (document, token) pair.
    pub fn new(server_url: impl Into<String>, doc_id: Uuid, token: Option<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            doc_id,
            token,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            mirror: Arc::new(Mutex::new(Mirror::default())),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect and spawn the reader/writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = match &self.token {
            Some(token) => format!("{}/ws/{}?token={token}", self.server_url, self.doc_id),
            None => format!("{}/ws/{}", self.server_url, self.doc_id),
        };
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(raw) = out_rx.recv().await {
                if ws_writer.send(Message::Text(raw.into())).await.is_err() {
                    return;
                }
            }
            // Handle dropped or disconnect() called: tell the server we are
            // leaving so it can clean up the session promptly.
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let mirror = self.mirror.clone();
        tokio::spawn(async move {
            while let Some(message) = ws_reader.next().await {
                match message {
                    Ok(Message::Text(raw)) => {
                        let frame = match ServerFrame::decode(raw.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::debug!("client: undecodable frame dropped: {e}");
                                continue;
                            }
                        };
                        if let Some(event) = apply_frame(&mirror, frame) {
                            let _ = event_tx.send(event).await;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                            None => (None, String::new()),
                        };
                        let _ = event_tx.send(ClientEvent::Closed { code, reason }).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection cleanly. Safe to call when already closed.
    pub async fn disconnect(&mut self) {
        // Dropping the outgoing sender makes the writer task send a close
        // frame and end.
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn send_insert(&self, index: usize, value: char) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Insert { index, value }).await
    }

    pub async fn send_delete(&self, index: usize) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Delete { index }).await
    }

    pub async fn send_paste(&self, index: usize, text: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Paste { index, text: text.into() }).await
    }

    pub async fn send_cut(&self, start_index: usize, end_index: usize) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Cut { start_index, end_index }).await
    }

    pub async fn send_cursor(&self, position: usize) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Cursor { position }).await
    }

    pub async fn send_heartbeat(&self) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Heartbeat).await
    }

    pub async fn send_sync_request(&self) -> Result<(), ProtocolError> {
        self.send(ClientFrame::SyncRequest).await
    }

    async fn send(&self, frame: ClientFrame) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let raw = frame.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx.send(raw).await.map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// The mirror's current text, if an `init` has arrived.
    pub fn text(&self) -> Option<String> {
        let mirror = self.mirror.lock().unwrap();
        mirror.sequence.as_ref().map(|s| s.get_text())
    }

    /// The last version applied to the mirror.
    pub fn version(&self) -> u64 {
        self.mirror.lock().unwrap().version
    }

    /// Our participant id as assigned by the server.
    pub fn participant_id(&self) -> Option<Uuid> {
        self.mirror.lock().unwrap().participant_id
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn doc_id(&self) -> Uuid {
        self.doc_id
    }
}

/// Fold a server frame into the mirror; returns the event to surface.
fn apply_frame(mirror: &Mutex<Mirror>, frame: ServerFrame) -> Option<ClientEvent> {
    match frame {
        ServerFrame::Init {
            participant_id,
            state,
            cursors,
            presence,
            ..
        } => {
            let mut m = mirror.lock().unwrap();
            let sequence = ReplicatedSequence::from_snapshot(&state, participant_id);
            let text = sequence.get_text();
            m.sequence = Some(sequence);
            m.version = state.version;
            m.participant_id = Some(participant_id);
            Some(ClientEvent::Initialized {
                text,
                version: state.version,
                presence,
                cursors,
            })
        }
        ServerFrame::Update {
            origin,
            version,
            characters,
        } => {
            let mut m = mirror.lock().unwrap();
            let text = match m.sequence.as_mut() {
                Some(sequence) => {
                    for ch in characters {
                        sequence.apply_remote(ch);
                    }
                    sequence.get_text()
                }
                None => return None, // update before init; nothing to apply to
            };
            m.version = version;
            Some(ClientEvent::RemoteUpdate {
                origin,
                version,
                text,
            })
        }
        ServerFrame::Cursor {
            participant_id,
            position,
        } => Some(ClientEvent::RemoteCursor {
            participant_id,
            position,
        }),
        ServerFrame::PresenceJoin { participant } => {
            Some(ClientEvent::PresenceJoined(participant))
        }
        ServerFrame::PresenceLeave { participant_id } => {
            Some(ClientEvent::PresenceLeft(participant_id))
        }
        ServerFrame::SyncResponse { state, version, .. } => {
            let mut m = mirror.lock().unwrap();
            let site = m.participant_id.unwrap_or_else(Uuid::new_v4);
            let sequence = ReplicatedSequence::from_snapshot(&state, site);
            let text = sequence.get_text();
            m.sequence = Some(sequence);
            m.version = version;
            Some(ClientEvent::SyncResponded { version, text })
        }
    }
}
