//! Security and caching headers added to every response.

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::config::AppConfig;

/// Applies:
///
/// - `X-Content-Type-Options: nosniff`, `X-Frame-Options: DENY`,
///   `Referrer-Policy: no-referrer`, a restrictive `Permissions-Policy`
/// - optional HSTS and CSP from `[security]`
/// - `Cache-Control: no-store` on JSON; product images under the media
///   prefix are content-addressed by a fresh UUID and cached for a day
pub async fn security_headers_middleware(
    State(cfg): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let is_media = req.uri().path().starts_with(cfg.media.public_base.trim_end_matches('/'));
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("referrer-policy", "no-referrer"),
        ("permissions-policy", "geolocation=(), microphone=(), camera=()"),
        ("cross-origin-opener-policy", "same-origin"),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }

    if let Some(sec) = cfg.security.as_ref() {
        if sec.enable_hsts.unwrap_or(false) {
            let max_age = sec.hsts_max_age.unwrap_or(31_536_000);
            let include_sub = if sec.hsts_include_subdomains.unwrap_or(false) { "; includeSubDomains" } else { "" };
            if let Ok(v) = HeaderValue::from_str(&format!("max-age={}{}", max_age, include_sub)) {
                headers.insert(HeaderName::from_static("strict-transport-security"), v);
            }
        }
        if let Some(csp) = sec.csp.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            if let Ok(v) = HeaderValue::from_str(csp) {
                headers.insert(HeaderName::from_static("content-security-policy"), v);
            }
        }
    }

    apply_cache_policy(headers, is_media);
    res
}

fn apply_cache_policy(headers: &mut HeaderMap, is_media: bool) {
    let content_type = match headers.get(CONTENT_TYPE).map(|ct| ct.to_str()) {
        Some(Ok(s)) => s.to_string(),
        Some(Err(e)) => {
            tracing::warn!("Invalid UTF-8 in Content-Type header: {}", e);
            return;
        }
        None => return,
    };
    if content_type.starts_with("application/json") {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    } else if is_media && content_type.starts_with("image/") {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400"));
        headers.remove(PRAGMA);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_never_cached() {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        apply_cache_policy(&mut h, false);
        assert_eq!(h.get(CACHE_CONTROL).unwrap(), "no-store");
    }

    #[test]
    fn media_images_are_cached() {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        apply_cache_policy(&mut h, true);
        assert_eq!(h.get(CACHE_CONTROL).unwrap(), "public, max-age=86400");

        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        apply_cache_policy(&mut h, false);
        assert!(h.get(CACHE_CONTROL).is_none());
    }
}
