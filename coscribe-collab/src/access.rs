//! Admission boundary: authentication and document access control.
//!
//! Identity resolution and ACLs live outside this service; the transport
//! only needs a yes/no with enough shape to pick a close code. Deployments
//! plug in their own [`AccessPolicy`]; tests and demos use the in-memory
//! [`TokenBook`] or the wide-open [`OpenDoor`].

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use uuid::Uuid;

use crate::protocol::close;

/// A resolved participant identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

/// Why a connection was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessError {
    /// No token was presented at all.
    MissingToken,
    /// The token did not resolve to an identity.
    InvalidToken,
    /// The identity exists but has no right to this document.
    Denied,
    /// The document id is unknown.
    UnknownDocument,
    /// Anything else that went wrong while checking.
    Internal(String),
}

impl AccessError {
    /// The WebSocket close code a refused connection is terminated with.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::MissingToken => close::NO_IDENTITY,
            Self::InvalidToken => close::AUTH_FAILED,
            Self::Denied => close::ACCESS_DENIED,
            Self::UnknownDocument => close::NOT_FOUND,
            Self::Internal(_) => close::SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => write!(f, "no token presented"),
            Self::InvalidToken => write!(f, "token did not authenticate"),
            Self::Denied => write!(f, "access denied"),
            Self::UnknownDocument => write!(f, "document not found"),
            Self::Internal(e) => write!(f, "access check failed: {e}"),
        }
    }
}

impl std::error::Error for AccessError {}

/// Decides whether a connection may edit a document.
pub trait AccessPolicy: Send + Sync {
    /// Resolve `token` and check it against `doc_id`.
    fn authorize(&self, token: Option<&str>, doc_id: Uuid) -> Result<Identity, AccessError>;
}

/// Per-document access rule tracked by [`TokenBook`].
#[derive(Debug, Clone)]
struct DocumentAcl {
    owner: Uuid,
    public: bool,
    collaborators: HashSet<Uuid>,
}

/// In-memory token and ACL registry.
///
/// Mirrors the owner / public-flag / collaborator-row rule of the upstream
/// document service without dragging a database into this crate.
#[derive(Default)]
pub struct TokenBook {
    tokens: RwLock<HashMap<String, Identity>>,
    documents: RwLock<HashMap<Uuid, DocumentAcl>>,
}

impl TokenBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and hand back their bearer token.
    pub fn issue(&self, username: impl Into<String>) -> (Uuid, String) {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            username: username.into(),
        };
        let token = Uuid::new_v4().simple().to_string();
        let user_id = identity.user_id;
        self.tokens.write().unwrap().insert(token.clone(), identity);
        (user_id, token)
    }

    /// Register a document with an owner.
    pub fn create_document(&self, owner: Uuid, public: bool) -> Uuid {
        let doc_id = Uuid::new_v4();
        self.documents.write().unwrap().insert(
            doc_id,
            DocumentAcl {
                owner,
                public,
                collaborators: HashSet::new(),
            },
        );
        doc_id
    }

    pub fn add_collaborator(&self, doc_id: Uuid, user_id: Uuid) {
        if let Some(acl) = self.documents.write().unwrap().get_mut(&doc_id) {
            acl.collaborators.insert(user_id);
        }
    }
}

impl AccessPolicy for TokenBook {
    fn authorize(&self, token: Option<&str>, doc_id: Uuid) -> Result<Identity, AccessError> {
        let token = token.ok_or(AccessError::MissingToken)?;
        let identity = self
            .tokens
            .read()
            .map_err(|e| AccessError::Internal(e.to_string()))?
            .get(token)
            .cloned()
            .ok_or(AccessError::InvalidToken)?;

        let documents = self
            .documents
            .read()
            .map_err(|e| AccessError::Internal(e.to_string()))?;
        let acl = documents.get(&doc_id).ok_or(AccessError::UnknownDocument)?;

        let allowed = acl.public
            || acl.owner == identity.user_id
            || acl.collaborators.contains(&identity.user_id);
        if allowed {
            Ok(identity)
        } else {
            Err(AccessError::Denied)
        }
    }
}

/// Accepts any token for any document; the token string becomes the
/// username. Demo and test use only.
pub struct OpenDoor;

impl AccessPolicy for OpenDoor {
    fn authorize(&self, token: Option<&str>, _doc_id: Uuid) -> Result<Identity, AccessError> {
        let name = token.unwrap_or("anonymous");
        Ok(Identity {
            user_id: Uuid::new_v4(),
            username: name.to_string(),
        })
    }
}
