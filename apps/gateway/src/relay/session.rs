//! One browser connection paired with one hub connection
//!
//! A session dials the hub before reading anything from the browser, then
//! forwards data messages in both directions until the first termination
//! event. Whatever ends the session, both legs are sent a close frame before
//! the session is deregistered.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use venue_gateway_common::{GatewayError, Leg, Result};

use super::frame::{CloseReason, Frame, WireMessage};
use crate::registry::{SessionHandle, SessionRegistry};
use crate::upstream::UpstreamConnector;

/// Per-session timing knobs
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// Bound on sending a close frame to one leg
    pub close_timeout: Duration,
    /// Close sessions with no traffic for this long
    pub idle_timeout: Option<Duration>,
}

/// The browser side of a session before it is paired
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub path: String,
    pub query: Option<String>,
    pub addr: Option<SocketAddr>,
}

impl ClientConnection {
    fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// Why a session stopped forwarding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// `leg` sent a close frame
    PeerClosed {
        leg: Leg,
        reason: Option<CloseReason>,
    },
    /// `leg` ended its stream without a close frame
    Disconnected { leg: Leg },
    ReadFailed { leg: Leg, error: String },
    WriteFailed { leg: Leg, error: String },
    IdleTimeout,
    Shutdown,
}

impl Termination {
    /// The leg whose connection ended the session, if one did
    pub fn failed_leg(&self) -> Option<Leg> {
        match self {
            Termination::PeerClosed { leg, .. }
            | Termination::Disconnected { leg }
            | Termination::ReadFailed { leg, .. }
            | Termination::WriteFailed { leg, .. } => Some(*leg),
            Termination::IdleTimeout | Termination::Shutdown => None,
        }
    }

    /// Abnormal loss of a leg, as a gateway error
    pub fn error(&self) -> Option<GatewayError> {
        match self {
            Termination::Disconnected { leg }
            | Termination::ReadFailed { leg, .. }
            | Termination::WriteFailed { leg, .. } => Some(GatewayError::PeerClosed(*leg)),
            Termination::PeerClosed { .. } | Termination::IdleTimeout | Termination::Shutdown => {
                None
            }
        }
    }

    /// Close frame owed to `leg`
    ///
    /// `None` means the leg ended the session itself and only needs its side
    /// of the closing handshake flushed. A leg whose read failed still gets a
    /// coded close naming the failure.
    pub fn close_for(&self, leg: Leg) -> Option<CloseReason> {
        match self {
            Termination::IdleTimeout => Some(CloseReason::going_away("idle timeout")),
            Termination::Shutdown => Some(CloseReason::going_away("gateway shutting down")),
            Termination::PeerClosed { leg: from, reason } => {
                (*from != leg).then(|| reason.clone().unwrap_or_else(CloseReason::normal))
            }
            Termination::ReadFailed { leg: lost, error } => Some(if *lost == leg {
                read_failure(error)
            } else {
                connection_lost(*lost)
            }),
            Termination::Disconnected { leg: lost }
            | Termination::WriteFailed { leg: lost, .. } => {
                (*lost != leg).then(|| connection_lost(*lost))
            }
        }
    }
}

/// Close owed to a leg whose incoming stream failed with `error`
///
/// Matches the error text of both WebSocket stacks: size overflows read
/// "Space limit exceeded", framing violations "protocol error" or "UTF-8".
fn read_failure(error: &str) -> CloseReason {
    if error.contains("Space limit exceeded") || error.contains("Message too long") {
        CloseReason::message_too_big("message too big")
    } else if error.contains("protocol error") || error.contains("UTF-8") {
        CloseReason::protocol_error("protocol error")
    } else {
        CloseReason::internal_error("read failed")
    }
}

fn connection_lost(lost: Leg) -> CloseReason {
    match lost {
        Leg::Client => CloseReason::going_away("client connection lost"),
        Leg::Upstream => CloseReason::internal_error("upstream connection lost"),
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::PeerClosed {
                leg,
                reason: Some(reason),
            } => write!(f, "{} closed ({} {})", leg, reason.code, reason.reason),
            Termination::PeerClosed { leg, reason: None } => write!(f, "{} closed", leg),
            Termination::Disconnected { leg } => write!(f, "{} disconnected", leg),
            Termination::ReadFailed { leg, error } => write!(f, "read from {} failed: {}", leg, error),
            Termination::WriteFailed { leg, error } => write!(f, "write to {} failed: {}", leg, error),
            Termination::IdleTimeout => f.write_str("idle timeout"),
            Termination::Shutdown => f.write_str("gateway shutdown"),
        }
    }
}

/// Last time either leg produced a frame, in milliseconds since start
struct Activity {
    started: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

/// A paired client and upstream connection
pub struct RelaySession<C, U> {
    client: C,
    upstream: U,
    handle: Arc<SessionHandle>,
    settings: RelaySettings,
}

impl<C, U, CM, UM, CE, UE> RelaySession<C, U>
where
    C: Stream<Item = std::result::Result<CM, CE>> + Sink<CM, Error = CE> + Unpin,
    U: Stream<Item = std::result::Result<UM, UE>> + Sink<UM, Error = UE> + Unpin,
    CM: WireMessage,
    UM: WireMessage,
    CE: fmt::Display,
    UE: fmt::Display,
{
    pub fn new(client: C, upstream: U, handle: Arc<SessionHandle>, settings: RelaySettings) -> Self {
        Self {
            client,
            upstream,
            handle,
            settings,
        }
    }

    /// Forward until the first termination, then close both legs
    pub async fn run(self) -> Termination {
        let RelaySession {
            client,
            upstream,
            handle,
            settings,
        } = self;

        handle.activate();
        let (mut client_tx, mut client_rx) = client.split::<CM>();
        let (mut upstream_tx, mut upstream_rx) = upstream.split::<UM>();
        let activity = Activity::new();

        let termination = tokio::select! {
            t = forward(Leg::Client, &mut client_rx, &mut upstream_tx, &handle, &activity) => t,
            t = forward(Leg::Upstream, &mut upstream_rx, &mut client_tx, &handle, &activity) => t,
            _ = handle.cancel_token().cancelled() => Termination::Shutdown,
            _ = idle_watchdog(settings.idle_timeout, &activity) => Termination::IdleTimeout,
        };
        debug!("Session {} terminating: {}", handle.id(), termination);

        tokio::join!(
            close_leg(
                Leg::Client,
                &mut client_tx,
                termination.close_for(Leg::Client).map(|r| CM::close(Some(r))),
                settings.close_timeout,
            ),
            close_leg(
                Leg::Upstream,
                &mut upstream_tx,
                termination.close_for(Leg::Upstream).map(|r| UM::close(Some(r))),
                settings.close_timeout,
            ),
        );
        handle.close();

        termination
    }
}

/// Move data messages from `from` to its peer until something ends the session
async fn forward<R, W, RM, WM, RE, WE>(
    from: Leg,
    rx: &mut R,
    tx: &mut W,
    handle: &SessionHandle,
    activity: &Activity,
) -> Termination
where
    R: Stream<Item = std::result::Result<RM, RE>> + Unpin,
    W: Sink<WM, Error = WE> + Unpin,
    RM: WireMessage,
    WM: WireMessage,
    RE: fmt::Display,
    WE: fmt::Display,
{
    let to = from.peer();
    loop {
        let message = match rx.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                return Termination::ReadFailed {
                    leg: from,
                    error: e.to_string(),
                };
            }
            None => return Termination::Disconnected { leg: from },
        };
        activity.touch();

        match message.classify() {
            Frame::Data(payload) => {
                if let Err(e) = tx.send(WM::data(payload)).await {
                    return Termination::WriteFailed {
                        leg: to,
                        error: e.to_string(),
                    };
                }
                handle.record_frame(to);
            }
            Frame::Close(reason) => return Termination::PeerClosed { leg: from, reason },
            Frame::Control => {}
        }
    }
}

async fn idle_watchdog(limit: Option<Duration>, activity: &Activity) {
    let Some(limit) = limit else {
        return std::future::pending().await;
    };
    loop {
        let idle = activity.idle_for();
        if idle >= limit {
            return;
        }
        tokio::time::sleep(limit - idle).await;
    }
}

/// Best-effort close of one leg; failures are logged and dropped
async fn close_leg<W, M, E>(leg: Leg, tx: &mut W, frame: Option<M>, limit: Duration)
where
    W: Sink<M, Error = E> + Unpin,
    E: fmt::Display,
{
    let attempt = async {
        if let Some(frame) = frame {
            tx.send(frame).await?;
        }
        tx.close().await
    };

    match tokio::time::timeout(limit, attempt).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Closing {} leg failed: {}", leg, e),
        Err(_) => debug!("Closing {} leg timed out after {:?}", leg, limit),
    }
}

/// Run one relay session for an accepted browser connection
///
/// Registers the session, dials the hub, and forwards until termination. If
/// the dial fails the browser is closed with 1011 and nothing is forwarded.
pub async fn serve_client<C, CM, CE>(
    mut client: C,
    connection: ClientConnection,
    connector: &UpstreamConnector,
    registry: &SessionRegistry,
    settings: RelaySettings,
) -> Result<Termination>
where
    C: Stream<Item = std::result::Result<CM, CE>> + Sink<CM, Error = CE> + Unpin,
    CM: WireMessage,
    CE: fmt::Display,
{
    let upstream_url = match connector.websocket_url(connection.query.as_deref()) {
        Ok(url) => url,
        Err(e) => {
            let unavailable = CloseReason::internal_error("upstream unavailable");
            close_leg(
                Leg::Client,
                &mut client,
                Some(CM::close(Some(unavailable))),
                settings.close_timeout,
            )
            .await;
            return Err(e);
        }
    };

    let registration = registry.register(
        connection.path_and_query(),
        connection.addr,
        upstream_url.as_str(),
    );
    let handle = registration.handle().clone();
    info!(
        "Session {} opened from {} on {}",
        handle.id(),
        connection
            .addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        connection.path_and_query()
    );

    let dialed = tokio::select! {
        result = connector.dial(&upstream_url) => Some(result),
        _ = handle.cancel_token().cancelled() => None,
    };

    let upstream = match dialed {
        Some(Ok(upstream)) => upstream,
        Some(Err(e)) => {
            handle.close();
            warn!("Session {} rejected: {}", handle.id(), e);
            let unavailable = CloseReason::internal_error("upstream unavailable");
            close_leg(
                Leg::Client,
                &mut client,
                Some(CM::close(Some(unavailable))),
                settings.close_timeout,
            )
            .await;
            return Err(e);
        }
        None => {
            handle.close();
            let shutdown = Termination::Shutdown;
            close_leg(
                Leg::Client,
                &mut client,
                shutdown.close_for(Leg::Client).map(|r| CM::close(Some(r))),
                settings.close_timeout,
            )
            .await;
            info!("Session {} cancelled while dialing", handle.id());
            return Ok(shutdown);
        }
    };

    let started = Instant::now();
    let termination = RelaySession::new(client, upstream, handle.clone(), settings)
        .run()
        .await;

    if let Some(err) = termination.error() {
        warn!("Session {} lost a leg: {} ({})", handle.id(), err, termination);
    }
    info!(
        "Session {} closed after {:?}: {} ({} to hub, {} to client)",
        handle.id(),
        started.elapsed(),
        termination,
        handle.frames_to(Leg::Upstream),
        handle.frames_to(Leg::Client)
    );

    drop(registration);
    Ok(termination)
}
