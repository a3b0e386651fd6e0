mod route;
mod session;

pub use route::{ProxyRoute, ResolvedRoute, RouteTable, RoutesFile};
pub use session::{Leg, SessionId, SessionInfo, SessionState};
