//! Live relay session registry
//!
//! The only mutable state shared between connections. Each session is
//! inserted when its browser connection is accepted and removed exactly once
//! when the [`Registration`] guard returned by [`SessionRegistry::register`]
//! is dropped.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use venue_gateway_common::{Leg, SessionId, SessionInfo, SessionState, generate_session_id};

/// Shared per-session state, readable from outside the session task
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    client_path: String,
    client_addr: Option<SocketAddr>,
    upstream_url: String,
    created_at: Instant,
    state: AtomicU8,
    cancel: CancellationToken,
    frames_to_upstream: AtomicU64,
    frames_to_client: AtomicU64,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(SessionState::Closed)
    }

    /// Fires when the gateway wants this session closed
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// `Created -> Active`; false if the session already left `Created`
    pub fn activate(&self) -> bool {
        self.transition(SessionState::Created, SessionState::Active)
    }

    /// Move to `Closed`; true only for the call that performed the transition
    pub fn close(&self) -> bool {
        self.transition(SessionState::Active, SessionState::Closed)
            || self.transition(SessionState::Created, SessionState::Closed)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        debug_assert!(from.can_transition_to(to));
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Count one data message delivered to `to`
    pub fn record_frame(&self, to: Leg) {
        let counter = match to {
            Leg::Upstream => &self.frames_to_upstream,
            Leg::Client => &self.frames_to_client,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_to(&self, to: Leg) -> u64 {
        match to {
            Leg::Upstream => self.frames_to_upstream.load(Ordering::Relaxed),
            Leg::Client => self.frames_to_client.load(Ordering::Relaxed),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            state: self.state(),
            client_path: self.client_path.clone(),
            client_addr: self.client_addr.map(|addr| addr.to_string()),
            upstream_url: self.upstream_url.clone(),
            age_ms: self.created_at.elapsed().as_millis() as u64,
            frames_to_upstream: self.frames_to(Leg::Upstream),
            frames_to_client: self.frames_to(Leg::Client),
        }
    }
}

/// Concurrent map of live relay sessions
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, Arc<SessionHandle>>>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session in `Created`
    ///
    /// The session's cancellation token is a child of the registry's, so a
    /// session registered after [`close_all`](Self::close_all) starts out
    /// cancelled.
    pub fn register(
        &self,
        client_path: impl Into<String>,
        client_addr: Option<SocketAddr>,
        upstream_url: impl Into<String>,
    ) -> Registration {
        let handle = Arc::new(SessionHandle {
            id: generate_session_id(),
            client_path: client_path.into(),
            client_addr,
            upstream_url: upstream_url.into(),
            created_at: Instant::now(),
            state: AtomicU8::new(SessionState::Created as u8),
            cancel: self.shutdown.child_token(),
            frames_to_upstream: AtomicU64::new(0),
            frames_to_client: AtomicU64::new(0),
        });

        self.sessions.insert(handle.id, handle.clone());
        debug!(
            "Registered session {} ({} live)",
            handle.id,
            self.sessions.len()
        );

        Registration {
            handle,
            registry: self.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|entry| entry.value().info()).collect()
    }

    /// Ask every live and future session to close
    pub fn close_all(&self) {
        info!("Closing {} relay session(s)", self.sessions.len());
        self.shutdown.cancel();
    }

    fn remove(&self, id: &SessionId) {
        if self.sessions.remove(id).is_some() {
            debug!("Deregistered session {} ({} live)", id, self.sessions.len());
        }
    }
}

/// Keeps a session registered; dropping it marks the session closed and
/// removes it from the registry
#[derive(Debug)]
pub struct Registration {
    handle: Arc<SessionHandle>,
    registry: SessionRegistry,
}

impl Registration {
    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.handle.close();
        self.registry.remove(&self.handle.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(registry: &SessionRegistry) -> Registration {
        registry.register("/ws", None, "ws://127.0.0.1:7000/ws")
    }

    #[test]
    fn test_register_and_drop() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());

        let registration = register(&registry);
        let id = registration.handle().id();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].state, SessionState::Created);

        let handle = registration.handle().clone();
        drop(registration);

        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[test]
    fn test_state_transitions_happen_once() {
        let registry = SessionRegistry::new();
        let registration = register(&registry);
        let handle = registration.handle();

        assert!(handle.activate());
        assert!(!handle.activate());
        assert_eq!(handle.state(), SessionState::Active);

        assert!(handle.close());
        assert!(!handle.close());
        assert!(!handle.activate());
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[test]
    fn test_created_session_can_close_directly() {
        let registry = SessionRegistry::new();
        let registration = register(&registry);

        assert!(registration.handle().close());
        assert_eq!(registration.handle().state(), SessionState::Closed);
    }

    #[test]
    fn test_sessions_are_independent() {
        let registry = SessionRegistry::new();
        let first = register(&registry);
        let second = register(&registry);
        assert_ne!(first.handle().id(), second.handle().id());

        first.handle().record_frame(Leg::Upstream);
        second.handle().cancel_token().cancel();
        drop(second);

        assert_eq!(registry.len(), 1);
        assert!(!first.handle().cancel_token().is_cancelled());
        assert_eq!(first.handle().frames_to(Leg::Upstream), 1);
        assert_eq!(first.handle().frames_to(Leg::Client), 0);
    }

    #[test]
    fn test_close_all_cancels_live_and_new_sessions() {
        let registry = SessionRegistry::new();
        let live = register(&registry);

        registry.close_all();
        assert!(live.handle().cancel_token().is_cancelled());

        let late = register(&registry);
        assert!(late.handle().cancel_token().is_cancelled());
    }

    #[test]
    fn test_snapshot_reports_counters() {
        let registry = SessionRegistry::new();
        let addr: SocketAddr = "10.1.2.3:55000".parse().unwrap();
        let registration = registry.register("/ws?venue=7", Some(addr), "ws://hub/ws?venue=7");
        let handle = registration.handle();
        handle.activate();
        handle.record_frame(Leg::Client);
        handle.record_frame(Leg::Client);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        let info = &snapshot[0];
        assert_eq!(info.state, SessionState::Active);
        assert_eq!(info.client_path, "/ws?venue=7");
        assert_eq!(info.client_addr.as_deref(), Some("10.1.2.3:55000"));
        assert_eq!(info.frames_to_client, 2);
        assert_eq!(info.frames_to_upstream, 0);
    }

    #[test]
    fn test_clones_share_sessions() {
        let registry = SessionRegistry::new();
        let clone = registry.clone();
        let _registration = register(&clone);
        assert_eq!(registry.len(), 1);
    }
}
