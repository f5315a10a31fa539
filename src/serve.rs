use std::io;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::signal;
use tower_http::compression::CompressionLayer;

use crate::config::SiteConfig;
use crate::loader::load_all;
use crate::markdown::html_escape;
use crate::page::Page;
use crate::resource::{self, HttpFetcher, STATIC_PREFIX};

/// Maximum number of consecutive ports to try before giving up.
const MAX_PORT_ATTEMPTS: u16 = 100;

/// Maximum static file size that will be read and served (16 MiB).
pub const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Template rendered for `/`.
const LANDING_PAGE: &str = "landing_page";

/// Template rendered for `/<text>/`.
const BASE_PAGE: &str = "base";

/// Shared application state passed to all request handlers via `Arc<AppState>`.
pub struct AppState {
    /// Directory holding the page templates.
    pub templates_dir: PathBuf,
    /// Directory exposed under `/static/`.
    pub static_root: PathBuf,
    /// Canonicalized `static_root` used for symlink-safe containment checks.
    pub canonical_static: PathBuf,
    /// Origin the load pass fetches markdown resources from.
    pub origin: String,
    pub config: SiteConfig,
}

/// Attempt to bind a TCP listener on `bind_addr` starting at `start_port`.
///
/// On `EADDRINUSE` the port is incremented by one and the attempt is retried up
/// to `MAX_PORT_ATTEMPTS` times. Any other OS error causes an immediate failure
/// without further retries.
pub fn bind_with_retry(bind_addr: &str, start_port: u16) -> Result<(TcpListener, u16), String> {
    let mut port = start_port;
    tracing::debug!(port, "trying port");
    for _ in 0..MAX_PORT_ATTEMPTS {
        let addr = socket_addr(bind_addr, port);
        match TcpListener::bind(&addr) {
            Ok(listener) => {
                tracing::debug!(port, "bound");
                return Ok((listener, port));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                let next = port.wrapping_add(1);
                tracing::debug!(port, next, "address in use");
                port = next;
            }
            Err(e) => {
                return Err(format!("bind {} failed: {}", addr, e));
            }
        }
    }
    Err(format!(
        "exhausted {} port candidates starting at {}; all ports in use",
        MAX_PORT_ATTEMPTS, start_port,
    ))
}

/// `host:port`, bracketing bare IPv6 hosts.
fn socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Origin a server bound to `bind_addr:port` can reach itself on.
///
/// Wildcard addresses are replaced by the matching loopback address.
pub fn self_origin(bind_addr: &str, port: u16) -> String {
    let host = match bind_addr {
        "" | "0.0.0.0" => "127.0.0.1",
        "::" | "[::]" => "::1",
        other => other,
    };
    format!("http://{}", socket_addr(host, port))
}

// ---------------------------------------------------------------------------
// Path resolution helpers
// ---------------------------------------------------------------------------

/// Decode `%XX` escapes in a request path before routing.
///
/// `None` for a truncated or non-hex escape, or when the decoded bytes are
/// not UTF-8, so `/%2e%2e/` is routed as `/../` and then rejected.
pub fn percent_decode(encoded: &str) -> Option<String> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut bytes = encoded.bytes();
    while let Some(b) = bytes.next() {
        if b != b'%' {
            out.push(b);
            continue;
        }
        let hi = char::from(bytes.next()?).to_digit(16)?;
        let lo = char::from(bytes.next()?).to_digit(16)?;
        out.push((hi * 16 + lo) as u8);
    }
    String::from_utf8(out).ok()
}

/// Derive the `Content-Type` value from a file extension (case-insensitive).
///
/// Returns `application/octet-stream` for any unrecognised extension so that
/// browsers never perform MIME sniffing on unknown types.
pub fn mime_for_ext(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "md" => "text/markdown; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// What a decoded request path asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// A page template plus the optional `{{ text }}` value.
    Page {
        template: &'static str,
        text: Option<String>,
    },
    /// A file under the static directory (path relative to it).
    Static(String),
    /// `/<text>` without the trailing slash; redirected to `/<text>/`.
    AddSlash,
    NotFound,
}

pub fn route(decoded: &str) -> Route {
    if decoded == "/" {
        return Route::Page {
            template: LANDING_PAGE,
            text: None,
        };
    }
    if let Some(rest) = decoded.strip_prefix(STATIC_PREFIX) {
        return Route::Static(rest.to_owned());
    }
    let Some(inner) = decoded.strip_prefix('/') else {
        return Route::NotFound;
    };
    let (segment, slash) = match inner.strip_suffix('/') {
        Some(segment) => (segment, true),
        None => (inner, false),
    };
    if segment.is_empty() || segment.contains('/') || segment == "static" {
        return Route::NotFound;
    }
    if slash {
        Route::Page {
            template: BASE_PAGE,
            text: Some(segment.to_owned()),
        }
    } else {
        Route::AddSlash
    }
}

/// Replace `{{ text }}` placeholders with the escaped `text`.
pub fn substitute_text(template: &str, text: &str) -> String {
    let escaped = html_escape(text);
    template
        .replace("{{ text }}", &escaped)
        .replace("{{text}}", &escaped)
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Plain-text error response; every response carries `nosniff`.
fn plain_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        body,
    )
        .into_response()
}

/// Unknown route, missing static file, or a path that leaves the static root.
fn not_found_response() -> Response {
    plain_response(StatusCode::NOT_FOUND, "Not Found".to_owned())
}

/// Static file over `MAX_FILE_SIZE`.
fn too_large_response(path: &str, size: u64) -> Response {
    plain_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        format!("{path} is {size} bytes; static files are limited to {MAX_FILE_SIZE} bytes"),
    )
}

/// `/<text>` without the trailing slash the page route expects.
fn redirect_response(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::PERMANENT_REDIRECT)
        .header(header::LOCATION, location)
        .header("X-Content-Type-Options", "nosniff")
        .body(Body::empty())
        .expect("redirect_response builder is infallible")
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Serve a file from the static directory.
///
/// `rest` is the decoded path below `/static/`. It is normalised, resolved
/// against the static root, canonicalised and re-checked for containment,
/// and rejected with 413 when larger than `MAX_FILE_SIZE`.
async fn serve_static(state: &AppState, rest: &str) -> Response {
    let Some(normalized) = resource::normalize_path(rest) else {
        tracing::debug!(path = rest, reason = "path-traversal", "static denied");
        return not_found_response();
    };
    let norm_display = normalized.display().to_string();
    let candidate = state.static_root.join(&normalized);

    let canonical = match tokio::fs::canonicalize(&candidate).await {
        Ok(c) => c,
        Err(_) => {
            tracing::debug!(path = %norm_display, reason = "not-found", "static denied");
            return not_found_response();
        }
    };
    if !canonical.starts_with(&state.canonical_static) {
        tracing::debug!(path = %norm_display, reason = "outside-root", "static denied");
        return not_found_response();
    }

    let meta = match tokio::fs::metadata(&canonical).await {
        Ok(m) if m.is_file() => m,
        _ => {
            tracing::debug!(path = %norm_display, reason = "not-a-file", "static denied");
            return not_found_response();
        }
    };
    let size = meta.len();
    if size > MAX_FILE_SIZE {
        tracing::debug!(path = %norm_display, size, reason = "too-large", "static denied");
        return too_large_response(&norm_display, size);
    }

    let bytes = match tokio::fs::read(&canonical).await {
        Ok(b) => b,
        Err(_) => return not_found_response(),
    };
    let ext = canonical
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());

    tracing::debug!(path = %norm_display, size, "static served");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_for_ext(ext))
        .header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified))
        .header("X-Content-Type-Options", "nosniff")
        .body(Body::from(bytes))
        .expect("serve_static response builder is infallible")
}

/// Run one load pass over `html` for the page named `page_name`.
///
/// The pass is blocking and runs on the blocking pool; it has fully settled
/// when this returns. If the pass cannot run, the page is returned unfilled.
async fn fill_page(state: &AppState, page_name: &'static str, html: String) -> String {
    let map = state.config.content_map_for(page_name);
    if map.is_empty() {
        return html;
    }
    let origin = state.origin.clone();
    let kind = state.config.site.renderer;
    let fallback = html.clone();

    let joined = tokio::task::spawn_blocking(move || {
        let mut page = Page::new(html);
        let fetcher = match HttpFetcher::new(&origin) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "fetcher unavailable, page left unfilled");
                return page.into_string();
            }
        };
        let renderer = kind.build();
        let outcomes = load_all(&mut page, &map, &fetcher, renderer.as_ref());
        let loaded = outcomes.iter().filter(|o| o.is_loaded()).count();
        tracing::info!(page = page_name, entries = outcomes.len(), loaded, "page filled");
        page.into_string()
    })
    .await;

    match joined {
        Ok(filled) => filled,
        Err(e) => {
            tracing::error!(page = page_name, error = %e, "load pass aborted");
            fallback
        }
    }
}

/// Render a page template: read it fresh, substitute `{{ text }}`, fill its
/// regions, and respond with the result.
async fn serve_page(state: &AppState, template: &'static str, text: Option<&str>) -> Response {
    let path = state.templates_dir.join(format!("{template}.html"));
    let source = match tokio::fs::read_to_string(&path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(template = %path.display(), error = %e, "template unreadable");
            return not_found_response();
        }
    };
    let html = match text {
        Some(text) => substitute_text(&source, text),
        None => source,
    };
    let filled = fill_page(state, template, html).await;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header("X-Content-Type-Options", "nosniff")
        .body(Body::from(filled))
        .expect("serve_page response builder is infallible")
}

/// Main request handler.
///
/// 1. Percent-decode the raw request path; reject malformed encodings and
///    null bytes.
/// 2. Route: `/` and `/<text>/` are pages, `/static/...` are files, and
///    `/<text>` is redirected to `/<text>/`.
///
/// All responses include `X-Content-Type-Options: nosniff`.
async fn serve_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let raw_path = req.uri().path().to_owned();

    let decoded = match percent_decode(&raw_path) {
        Some(d) => d,
        None => {
            tracing::debug!(path = %raw_path, reason = "invalid-percent-encoding", "request denied");
            return not_found_response();
        }
    };
    if decoded.contains('\0') {
        tracing::debug!(path = %raw_path, reason = "null-byte", "request denied");
        return not_found_response();
    }

    match route(&decoded) {
        Route::Page { template, text } => {
            tracing::debug!(path = %raw_path, template, "page request");
            serve_page(&state, template, text.as_deref()).await
        }
        Route::Static(rest) => serve_static(&state, &rest).await,
        Route::AddSlash => redirect_response(&format!("{raw_path}/")),
        Route::NotFound => {
            tracing::debug!(path = %raw_path, reason = "no-route", "request denied");
            not_found_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

/// Serve the site rooted at `site_root`.
///
/// Binds to `bind_addr` starting at `start_port`, retrying on `EADDRINUSE` up
/// to 100 times. The server shuts down cleanly when SIGINT (Ctrl+C) is
/// received.
pub async fn run_serve(
    site_root: PathBuf,
    config: SiteConfig,
    bind_addr: String,
    start_port: u16,
) -> anyhow::Result<()> {
    let templates_dir = config.templates_dir(&site_root);
    let static_root = config.static_dir(&site_root);
    let canonical_static = std::fs::canonicalize(&static_root)
        .with_context(|| format!("static directory {} is missing", static_root.display()))?;

    let (std_listener, bound_port) =
        bind_with_retry(&bind_addr, start_port).map_err(anyhow::Error::msg)?;
    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)?;

    let origin = config
        .site
        .origin
        .clone()
        .unwrap_or_else(|| self_origin(&bind_addr, bound_port));

    let state = Arc::new(AppState {
        templates_dir,
        static_root,
        canonical_static,
        origin,
        config,
    });

    let app = Router::new()
        .fallback(serve_handler)
        .layer(CompressionLayer::new())
        .with_state(Arc::clone(&state));

    tracing::info!(
        address = %socket_addr(&bind_addr, bound_port),
        origin = %state.origin,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to install SIGINT handler");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown complete");
        })
        .await
        .context("server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
