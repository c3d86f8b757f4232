use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::config::AppConfig;

/// Rejects obviously hostile requests before routing.
///
/// - path traversal sequences in the URI (400)
/// - declared `Content-Length` above [`AppConfig::max_body_bytes`] on POST/PUT (413)
/// - suspicious user agents are only logged
pub async fn validate_request_middleware(
    State(cfg): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let uri_path = req.uri().path();
    if contains_path_traversal(uri_path) {
        tracing::warn!(path = %sanitize_for_logging(uri_path), "path traversal rejected");
        return reject(StatusCode::BAD_REQUEST, "INVALID_PATH", "Path traversal detected in request".into());
    }

    if let Some(ua) = req.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
        if is_suspicious_user_agent(ua) {
            tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua));
        }
    }

    if matches!(*req.method(), Method::POST | Method::PUT) {
        let declared = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<usize>().ok());
        let max = cfg.max_body_bytes();
        if let Some(length) = declared.filter(|&l| l > max) {
            tracing::warn!(length, max, "oversized request body rejected");
            return reject(
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                format!("Request body exceeds maximum size of {} bytes", max),
            );
        }
    }

    next.run(req).await
}

fn reject(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(json!({
            "error": { "code": code, "message": message },
            "status": status.as_u16(),
        })),
    )
        .into_response()
}

fn contains_path_traversal(path: &str) -> bool {
    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("....") || path.contains('\0') {
        return true;
    }
    let lower = path.to_lowercase();
    // Single and double URL-encoded dot/slash sequences plus encoded NUL.
    const ENCODED: &[&str] = &["%2e%2e", "%252e%252e", "%2e/", "%252e%2f", "/%2e", "%2f%2e", "%2e%5c", "%5c%2e", "%00"];
    ENCODED.iter().any(|p| lower.contains(p))
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua = ua.to_lowercase();
    ["scanner", "nikto", "sqlmap", "havij", "acunetix"].iter().any(|p| ua.contains(p))
        || (ua.contains("crawler") && !ua.contains("googlebot") && !ua.contains("bingbot"))
}

/// Strips control characters, escapes quotes and caps the length at 200 chars.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_traversal_detection() {
        assert!(contains_path_traversal("../etc/passwd"));
        assert!(contains_path_traversal("/media/../data/warenhaus.db"));
        assert!(contains_path_traversal("/media/%2e%2e/secret"));
        assert!(contains_path_traversal("path\0with\0null"));

        assert!(!contains_path_traversal("/api/products/550e8400-e29b-41d4-a716-446655440000"));
        assert!(!contains_path_traversal("/media/abc.png"));
    }

    #[test]
    fn test_suspicious_user_agents() {
        assert!(is_suspicious_user_agent("nikto/2.1.5"));
        assert!(is_suspicious_user_agent("sqlmap/1.0"));
        assert!(!is_suspicious_user_agent("Mozilla/5.0 (X11; Linux x86_64)"));
        assert!(!is_suspicious_user_agent("Googlebot/2.1 crawler"));
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("normal text"), "normal text");
        let sanitized = sanitize_for_logging("text\x00with\x01control");
        assert!(!sanitized.contains('\x00'));
        assert!(!sanitized.contains('\x01'));
        assert_eq!(sanitize_for_logging(&"a".repeat(300)).len(), 200);
    }
}
