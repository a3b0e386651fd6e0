use url::Url;

use crate::error::{GatewayError, Result};

/// Map an HTTP base address onto its WebSocket equivalent
///
/// `http` becomes `ws` and `https` becomes `wss`; WebSocket bases are kept.
pub fn websocket_base(base: &Url) -> Result<Url> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(GatewayError::InvalidConfig(format!(
                "unsupported hub scheme '{}'",
                other
            )));
        }
    };

    // `Url::set_scheme` refuses http -> ws, so rebuild from the string form
    let rest = &base.as_str()[base.scheme().len()..];
    Ok(Url::parse(&format!("{}{}", scheme, rest))?)
}

/// WebSocket URL of `path` on the hub, keeping the hub's base path
pub fn websocket_url(base: &Url, path: &str, query: Option<&str>) -> Result<Url> {
    let mut url = websocket_base(base)?;
    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}
