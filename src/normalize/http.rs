//! Upstream target resolution for HTTP calls

use url::Url;

use super::InboundCall;
use crate::{RecplayError, Result};

/// Query parameter carrying an explicit upstream URL
const URL_PARAM: &str = "url";

/// Host suffix of subdomain-encoded origins
const LOCALHOST_SUFFIX: &str = ".localhost";

/// Resolve the absolute upstream URL of an HTTP call
///
/// Tried in order, first success wins:
/// 1. `url=` query parameter
/// 2. absolute URL in the request target (`http://host/x` or `/https://host/x`)
/// 3. `Host: {encodedHost}.localhost:{port}`, rewritten to `https://{encodedHost}{path}`
/// 4. relative path joined onto a target embedded in the `Referer`
///
/// # Errors
///
/// Returns `UnresolvableTarget` if none of the rules apply
pub fn resolve_http_target(call: &InboundCall) -> Result<Url> {
    resolve_embedded(&call.uri, call.header("host"))
        .or_else(|| resolve_from_referer(call))
        .ok_or_else(|| RecplayError::UnresolvableTarget(call.uri.clone()))
}

/// Rules 1 to 3, shared by the inbound call and its referer
fn resolve_embedded(uri: &str, host: Option<&str>) -> Option<Url> {
    from_query_param(uri)
        .or_else(|| from_absolute_path(uri))
        .or_else(|| host.and_then(|host| from_subdomain(host, uri)))
}

fn from_query_param(uri: &str) -> Option<Url> {
    let (_, query) = uri.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();

    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == URL_PARAM)
        .and_then(|(_, value)| parse_absolute(&value))
}

fn from_absolute_path(uri: &str) -> Option<Url> {
    if is_absolute(uri) {
        return parse_absolute(uri);
    }

    let embedded = uri.strip_prefix('/')?;
    if is_absolute(embedded) {
        return parse_absolute(embedded);
    }

    // Some clients collapse `https://` in a path to `https:/`
    for scheme in ["https:/", "http:/"] {
        if let Some(rest) = embedded.strip_prefix(scheme) {
            return parse_absolute(&format!("{scheme}/{rest}"));
        }
    }

    None
}

fn from_subdomain(host: &str, uri: &str) -> Option<Url> {
    if !uri.starts_with('/') {
        return None;
    }

    let name = strip_port(host).to_ascii_lowercase();
    let encoded = name.strip_suffix(LOCALHOST_SUFFIX)?;
    if encoded.is_empty() {
        return None;
    }

    let decoded = urlencoding::decode(encoded).ok()?;
    parse_absolute(&format!("https://{decoded}{uri}"))
}

fn resolve_from_referer(call: &InboundCall) -> Option<Url> {
    if !call.uri.starts_with('/') {
        return None;
    }

    let referer = Url::parse(call.header("referer")?).ok()?;
    let referer_uri = match referer.query() {
        Some(query) => format!("{}?{query}", referer.path()),
        None => referer.path().to_string(),
    };
    let referer_host = match (referer.host_str(), referer.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => return None,
    };

    let base = resolve_embedded(&referer_uri, Some(&referer_host))?;
    base.join(&call.uri).ok().filter(is_http)
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn is_absolute(candidate: &str) -> bool {
    let lower = candidate.get(..8).unwrap_or(candidate).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn parse_absolute(candidate: &str) -> Option<Url> {
    Url::parse(candidate).ok().filter(is_http)
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(uri: &str, headers: &[(&str, &str)]) -> InboundCall {
        InboundCall {
            method: "GET".to_string(),
            uri: uri.to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| ((*n).to_string(), (*v).to_string()))
                .collect(),
            ..InboundCall::default()
        }
    }

    fn resolve(uri: &str, headers: &[(&str, &str)]) -> Option<String> {
        resolve_http_target(&call(uri, headers))
            .ok()
            .map(|url| url.to_string())
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            resolve("/proxy?url=https%3A%2F%2Fexample.com%2Fa%3Fb%3D1", &[]).as_deref(),
            Some("https://example.com/a?b=1")
        );
    }

    #[test]
    fn test_query_param_beats_absolute_path() {
        assert_eq!(
            resolve(
                "/https://other.example.org/b?url=https%3A%2F%2Fexample.com%2Fa",
                &[("Host", "api.example.net.localhost:8080")]
            )
            .as_deref(),
            Some("https://example.com/a")
        );
    }

    #[test]
    fn test_invalid_query_param_falls_through() {
        assert_eq!(
            resolve("/https://example.com/x?url=not-a-url", &[]).as_deref(),
            Some("https://example.com/x?url=not-a-url")
        );
    }

    #[test]
    fn test_absolute_form_target() {
        assert_eq!(
            resolve("http://api.example.com/v1/users", &[]).as_deref(),
            Some("http://api.example.com/v1/users")
        );
    }

    #[test]
    fn test_absolute_path() {
        assert_eq!(
            resolve("/https://example.com/a/b?c=d", &[]).as_deref(),
            Some("https://example.com/a/b?c=d")
        );
    }

    #[test]
    fn test_collapsed_scheme_slashes() {
        assert_eq!(
            resolve("/https:/example.com/a", &[]).as_deref(),
            Some("https://example.com/a")
        );
    }

    #[test]
    fn test_subdomain_origin() {
        assert_eq!(
            resolve("/v1/users?x=1", &[("Host", "api.example.com.localhost:8080")]).as_deref(),
            Some("https://api.example.com/v1/users?x=1")
        );
    }

    #[test]
    fn test_subdomain_origin_percent_decoded() {
        assert_eq!(
            resolve("/", &[("host", "example.com%3A8443.localhost:8080")]).as_deref(),
            Some("https://example.com:8443/")
        );
    }

    #[test]
    fn test_bare_localhost_is_not_an_origin() {
        assert_eq!(resolve("/v1/users", &[("Host", "localhost:8080")]), None);
    }

    #[test]
    fn test_referer_embedded_path() {
        assert_eq!(
            resolve(
                "/static/app.js",
                &[
                    ("Host", "localhost:8080"),
                    ("Referer", "http://localhost:8080/https://example.com/page")
                ]
            )
            .as_deref(),
            Some("https://example.com/static/app.js")
        );
    }

    #[test]
    fn test_referer_query_param() {
        assert_eq!(
            resolve(
                "/img.png",
                &[("Referer", "http://localhost:8080/?url=https%3A%2F%2Fcdn.example.com%2Fdir%2F")]
            )
            .as_deref(),
            Some("https://cdn.example.com/img.png")
        );
    }

    #[test]
    fn test_referer_subdomain() {
        assert_eq!(
            resolve(
                "/api/data",
                &[("Referer", "http://app.example.com.localhost:8080/home")]
            )
            .as_deref(),
            Some("https://app.example.com/api/data")
        );
    }

    #[test]
    fn test_referer_without_embedded_target() {
        assert_eq!(
            resolve("/a", &[("Referer", "http://localhost:8080/plain")]),
            None
        );
    }

    #[test]
    fn test_unresolvable_error() {
        let err = resolve_http_target(&call("/nothing", &[])).unwrap_err();
        assert!(matches!(err, RecplayError::UnresolvableTarget(uri) if uri == "/nothing"));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        assert_eq!(resolve("/?url=ftp%3A%2F%2Fexample.com%2Ff", &[]), None);
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("a.localhost:8080"), "a.localhost");
        assert_eq!(strip_port("a.localhost"), "a.localhost");
        assert_eq!(strip_port("a.localhost:"), "a.localhost:");
    }
}
