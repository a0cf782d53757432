//! Development server for the browser host
//!
//! Serves a static directory with the cross-origin isolation headers needed
//! for a shared `WebAssembly.Memory`, and module-script friendly MIME types.
//!
//! Usage: `dev-server [DIR]` (default `web`), port from `PORT` (default 8080).

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
    routing::get_service,
    Router,
};
use std::net::SocketAddr;
use tower_http::services::ServeDir;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DIR: &str = "web";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DIR.to_string());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("[dev-server] Serving {} at http://localhost:{}", dir, port);
    println!("[dev-server] Press Ctrl+C to stop");

    axum::serve(listener, app(&dir)).await
}

fn app(dir: &str) -> Router {
    let serve_dir = ServeDir::new(dir).precompressed_gzip().precompressed_br();

    Router::new()
        .fallback_service(get_service(serve_dir).handle_error(|_| async {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }))
        .layer(axum::middleware::from_fn(add_headers))
}

/// Content type for module scripts and kernel images, keyed by extension
fn mime_for(path: &str) -> Option<&'static str> {
    let (_, ext) = path.rsplit_once('.')?;
    match ext {
        "js" | "mjs" => Some("application/javascript; charset=utf-8"),
        "wasm" => Some("application/wasm"),
        "html" => Some("text/html; charset=utf-8"),
        "css" => Some("text/css; charset=utf-8"),
        "json" => Some("application/json; charset=utf-8"),
        _ => None,
    }
}

async fn add_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let content_type = mime_for(request.uri().path());

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    // Shared memory requires cross-origin isolation
    headers.insert(
        "Cross-Origin-Opener-Policy",
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        "Cross-Origin-Embedder-Policy",
        HeaderValue::from_static("require-corp"),
    );

    if let Some(content_type) = content_type {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    response
}
