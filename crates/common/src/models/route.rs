use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GatewayError, Result};
use crate::validation::validate_prefix;

fn default_strip_prefix() -> bool {
    true
}

/// A single entry of the proxy route table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRoute {
    /// External path prefix, e.g. `/api`
    pub prefix: String,

    /// Base address requests are forwarded to
    pub target: Url,

    /// Remove the prefix before forwarding
    #[serde(default = "default_strip_prefix")]
    pub strip_prefix: bool,
}

impl ProxyRoute {
    /// Create a validated route
    pub fn new(prefix: &str, target: Url, strip_prefix: bool) -> Result<Self> {
        let prefix = validate_prefix(prefix)
            .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;

        if !matches!(target.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidConfig(format!(
                "route {} targets unsupported scheme '{}'",
                prefix,
                target.scheme()
            )));
        }
        if target.cannot_be_a_base() || target.host_str().is_none() {
            return Err(GatewayError::InvalidConfig(format!(
                "route {} target has no host: {}",
                prefix, target
            )));
        }

        Ok(Self {
            prefix,
            target,
            strip_prefix,
        })
    }

    /// Remainder of `path` after the prefix, if the prefix matches on a segment boundary
    fn remainder<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

/// A route matched against a request path
#[derive(Debug, Clone)]
pub struct ResolvedRoute<'a> {
    pub route: &'a ProxyRoute,

    /// Path the upstream receives, always starting with `/`
    pub upstream_path: String,
}

impl ResolvedRoute<'_> {
    /// Full upstream URL for this request, carrying the original query string
    pub fn upstream_url(&self, query: Option<&str>) -> Url {
        let mut url = self.route.target.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base, self.upstream_path));
        url.set_query(query.filter(|q| !q.is_empty()));
        url
    }
}

/// Static mapping from external path prefixes to upstream targets
///
/// Built once at startup and shared read-only. The longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<ProxyRoute>,
}

impl RouteTable {
    /// Build a table, rejecting duplicate prefixes
    pub fn new(mut routes: Vec<ProxyRoute>) -> Result<Self> {
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        for pair in routes.windows(2) {
            if pair[0].prefix == pair[1].prefix {
                return Err(GatewayError::InvalidConfig(format!(
                    "duplicate route prefix: {}",
                    pair[0].prefix
                )));
            }
        }

        Ok(Self { routes })
    }

    /// Find the route for `path`
    ///
    /// A routed path carrying a `.` or `..` segment, literal or percent-encoded,
    /// is rejected: the upstream URL would resolve it and leave the target's base path.
    pub fn resolve(&self, path: &str) -> Result<ResolvedRoute<'_>> {
        for route in &self.routes {
            if let Some(rest) = route.remainder(path) {
                if rest.split(['/', '\\']).any(is_dot_segment) {
                    return Err(GatewayError::InvalidRequestPath(path.to_string()));
                }
                let upstream_path = if !route.strip_prefix {
                    path.to_string()
                } else if rest.is_empty() {
                    "/".to_string()
                } else {
                    rest.to_string()
                };
                return Ok(ResolvedRoute {
                    route,
                    upstream_path,
                });
            }
        }

        Err(GatewayError::RouteNotFound(path.to_string()))
    }

    pub fn routes(&self) -> &[ProxyRoute] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// On-disk list of additional routes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutesFile {
    #[serde(default)]
    pub routes: Vec<ProxyRoute>,
}

impl RoutesFile {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
