//! WebSocket transport adapter.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── Persistence (ContentStore)
//!             ├── DocumentHub ── Router(doc) ── ReplicatedSequence
//! Client B ──┘        │               └── SessionRegistry
//!                     │
//!          one task per connection:
//!          reader  → decode JSON → router mailbox
//!          writer  ← outbound mpsc ← router fan-out
//! ```
//!
//! Admission happens during the WebSocket upgrade: the request path names
//! the document (`/ws/{doc_id}`) and the query string carries the bearer
//! token (`?token=…`). Refused connections are completed and then closed
//! with a distinct close code so clients can tell auth failures from
//! missing documents.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::access::{AccessError, AccessPolicy};
use crate::hub::DocumentHub;
use crate::protocol::ClientFrame;
use crate::router::RouterConfig;
use crate::storage::{ContentStore, MemoryStore, RocksStore, StoreConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Router mailbox depth per document
    pub mailbox_capacity: usize,
    /// Outbound queue depth per participant
    pub outbound_capacity: usize,
    /// Periodic flush/sweep interval in seconds
    pub save_interval_secs: u64,
    /// Idle window before presence eviction, in seconds
    pub away_timeout_secs: u64,
    /// Persistence path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            mailbox_capacity: 256,
            outbound_capacity: 256,
            save_interval_secs: 10,
            away_timeout_secs: 300,
            storage_path: None,
        }
    }
}

impl ServerConfig {
    fn router_config(&self) -> RouterConfig {
        RouterConfig {
            save_interval: std::time::Duration::from_secs(self.save_interval_secs.max(1)),
            away_timeout: std::time::Duration::from_secs(self.away_timeout_secs.max(1)),
            mailbox_capacity: self.mailbox_capacity,
        }
    }
}

/// Server-wide statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub refused_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
}

/// The collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    hub: Arc<DocumentHub>,
    policy: Arc<dyn AccessPolicy>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollabServer {
    /// Create a server, opening persistent storage when configured.
    pub fn new(config: ServerConfig, policy: Arc<dyn AccessPolicy>) -> Self {
        let store: Arc<dyn ContentStore> = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Arc::new(RocksStore::open(store_config).expect("failed to open content store"))
            }
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(config, store, policy)
    }

    /// Create a server around an existing store (tests share stores across
    /// server instances this way).
    pub fn with_store(
        config: ServerConfig,
        store: Arc<dyn ContentStore>,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        let hub = DocumentHub::new(store, config.router_config());
        Self {
            config,
            hub,
            policy,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Listen and serve. Runs the accept loop forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("collab server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("tcp connection from {addr}");

            let hub = self.hub.clone();
            let policy = self.policy.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, hub, policy, stats, config).await {
                    log::debug!("connection from {addr} ended with error: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &Arc<DocumentHub> {
        &self.hub
    }
}

/// Pull `(doc_id, token)` out of the upgrade request target.
fn parse_target(path: &str, query: Option<&str>) -> Result<(Uuid, Option<String>), AccessError> {
    let doc_id = path
        .strip_prefix("/ws/")
        .and_then(|raw| Uuid::parse_str(raw.trim_end_matches('/')).ok())
        .ok_or(AccessError::UnknownDocument)?;

    let token = query.and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("token=").map(|t| t.to_string()))
    });

    Ok((doc_id, token))
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<DocumentHub>,
    policy: Arc<dyn AccessPolicy>,
    stats: Arc<RwLock<ServerStats>>,
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Capture the request target during the upgrade; admission is decided
    // right after the handshake so refusals reach the client as a proper
    // close frame rather than an aborted socket.
    let mut target: Option<(String, Option<String>)> = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        let uri = req.uri();
        target = Some((
            uri.path().to_string(),
            uri.query().map(|q| q.to_string()),
        ));
        Ok(resp)
    })
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let admitted = target
        .ok_or(AccessError::Internal("no upgrade request captured".into()))
        .and_then(|(path, query)| {
            let (doc_id, token) = parse_target(&path, query.as_deref())?;
            let identity = policy.authorize(token.as_deref(), doc_id)?;
            Ok((doc_id, identity))
        });

    let (doc_id, identity) = match admitted {
        Ok(ok) => ok,
        Err(refusal) => {
            log::info!("refusing {addr}: {refusal}");
            {
                let mut s = stats.write().await;
                s.refused_connections += 1;
            }
            let frame = CloseFrame {
                code: CloseCode::from(refusal.close_code()),
                reason: refusal.to_string().into(),
            };
            let _ = ws_sender.send(Message::Close(Some(frame))).await;
            return Ok(());
        }
    };

    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }
    log::info!(
        "{} ({}) connected from {addr} for doc {doc_id}",
        identity.username,
        identity.user_id
    );

    let participant_id = identity.user_id;
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Arc<str>>(config.outbound_capacity);
    hub.join(doc_id, identity, outbound_tx.clone()).await;

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(raw))) => {
                        {
                            let mut s = stats.write().await;
                            s.total_frames += 1;
                            s.total_bytes += raw.len() as u64;
                        }
                        match ClientFrame::decode(raw.as_str()) {
                            Ok(frame) => hub.submit(doc_id, participant_id, frame).await,
                            // Malformed frames are dropped with no state
                            // change; the session keeps running.
                            Err(e) => log::debug!("{addr}: undecodable frame dropped: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        ws_sender.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary/pong frames carry nothing here
                    Some(Err(e)) => {
                        log::debug!("{addr}: socket error, treating as disconnect: {e}");
                        break;
                    }
                }
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(text) => {
                        ws_sender.send(Message::Text(text.to_string().into())).await?;
                    }
                    // Registry dropped our channel (eviction or rejoin
                    // elsewhere); end the connection.
                    None => break,
                }
            }
        }
    }

    hub.leave(doc_id, participant_id, outbound_tx).await;
    {
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
    }
    log::info!("{participant_id} disconnected from doc {doc_id}");

    Ok(())
}
