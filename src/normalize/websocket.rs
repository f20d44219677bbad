//! Upstream target resolution for WebSocket-RPC connections

use url::Url;

use crate::{RecplayError, Result};

/// Connection parameter carrying the URL-encoded upstream target
pub const TARGET_PARAM: &str = "url";

/// Resolve the upstream target of a WebSocket-RPC connection
///
/// The target must be given explicitly; there is no fallback. `http(s)`
/// targets are mapped onto `ws(s)`.
///
/// # Errors
///
/// Returns `UnresolvableTarget` if the parameter is missing, blank or not an
/// absolute WebSocket URL
pub fn resolve_ws_target(uri: &str) -> Result<Url> {
    let query = uri
        .split_once('?')
        .map(|(_, query)| query)
        .unwrap_or_default();

    let raw = url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TARGET_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            RecplayError::UnresolvableTarget(format!("missing `{TARGET_PARAM}` parameter"))
        })?;

    let mut target = Url::parse(&raw)
        .map_err(|e| RecplayError::UnresolvableTarget(format!("{raw}: {e}")))?;

    let scheme = match target.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(RecplayError::UnresolvableTarget(format!(
                "{raw}: unsupported scheme `{other}`"
            )))
        }
    };
    if target.scheme() != scheme && target.set_scheme(scheme).is_err() {
        return Err(RecplayError::UnresolvableTarget(raw));
    }

    if target.host_str().map_or(true, str::is_empty) {
        return Err(RecplayError::UnresolvableTarget(raw));
    }

    Ok(target)
}
