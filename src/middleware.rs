use axum::http::{HeaderValue, header, Request};
use axum::response::Response;
use axum::middleware::Next;
use axum::body::Body;

/// security headers for the static client and uploaded files
///
/// The scene client loads models through blob urls, so those are allowed
/// for fetches and images.
pub async fn add_security_headers(
    req: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; connect-src 'self' blob:; style-src 'self' 'unsafe-inline'; img-src 'self' data: blob:",
        ),
    );

    response
}
