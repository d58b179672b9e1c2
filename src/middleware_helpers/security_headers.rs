use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

const API_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "content-security-policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
    ("x-permitted-cross-domain-policies", "none"),
];

/// Hardening headers for JSON responses. Swagger UI serves HTML and scripts,
/// so it keeps its own content policy.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let is_docs = req.uri().path().starts_with("/swagger-ui");
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    for (name, value) in API_HEADERS {
        if is_docs && name == "content-security-policy" {
            continue;
        }
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }

    if !headers.contains_key(header::CACHE_CONTROL) {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }

    res
}
