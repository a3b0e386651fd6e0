use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique relay session identifier
pub type SessionId = Uuid;

/// One side of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    /// The browser connection accepted by the gateway
    Client,
    /// The connection the gateway opened to the hub
    Upstream,
}

impl Leg {
    /// The opposite leg of the same session
    pub fn peer(self) -> Leg {
        match self {
            Leg::Client => Leg::Upstream,
            Leg::Upstream => Leg::Client,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Client => f.write_str("client"),
            Leg::Upstream => f.write_str("upstream"),
        }
    }
}

/// Lifecycle of a relay session
///
/// `Created -> Active -> Closed`, or `Created -> Closed` when the upstream
/// dial fails. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Active = 1,
    Closed = 2,
}

impl SessionState {
    /// Decode a state stored as its discriminant
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SessionState::Created),
            1 => Some(SessionState::Active),
            2 => Some(SessionState::Closed),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Created, SessionState::Active)
                | (SessionState::Created, SessionState::Closed)
                | (SessionState::Active, SessionState::Closed)
        )
    }
}

/// Point-in-time view of a relay session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,

    pub state: SessionState,

    /// Path and query the browser connected on
    pub client_path: String,

    /// Peer address of the browser, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_addr: Option<String>,

    /// Hub endpoint this session dials
    pub upstream_url: String,

    /// Milliseconds since the session was created
    pub age_ms: u64,

    /// Data messages forwarded browser -> hub
    pub frames_to_upstream: u64,

    /// Data messages forwarded hub -> browser
    pub frames_to_client: u64,
}
