use uuid::Uuid;

use crate::models::SessionId;

/// Generate a unique relay session identifier
pub fn generate_session_id() -> SessionId {
    Uuid::new_v4()
}

/// Generate a unique identifier for one proxied REST request
pub fn generate_request_id() -> String {
    format!("req_{}", Uuid::new_v4())
}
