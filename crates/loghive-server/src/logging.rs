use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Per-request trace id, injected as a request extension and echoed in the
/// `X-Trace-Id` response header.
#[derive(Debug, Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// Generate a 16-character hex trace ID (8 random bytes).
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

// ANSI color codes
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const BLUE: &str = "\x1b[34m";
const GRAY: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";

fn method_color(method: &axum::http::Method) -> &'static str {
    match method.as_str() {
        "GET" => GREEN,
        "POST" => CYAN,
        "HEAD" => GRAY,
        _ => BLUE,
    }
}

/// Format elapsed time with color: green <100ms, yellow 100ms-1s, red >1s.
fn format_elapsed(elapsed_us: u128) -> String {
    let (time_str, color) = if elapsed_us < 1000 {
        (format!("{elapsed_us}µs"), GREEN)
    } else if elapsed_us < 100_000 {
        (format!("{}ms", elapsed_us / 1000), GREEN)
    } else if elapsed_us < 1_000_000 {
        (format!("{}ms", elapsed_us / 1000), YELLOW)
    } else {
        (format!("{:.1}s", elapsed_us as f64 / 1_000_000.0), RED)
    };
    format!("{color}{time_str}{RESET}")
}

fn now_str() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Request/response logging middleware.
///
/// Bodies are never captured here: the ingest route is the hot path and its
/// payloads can be large.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = TraceId(generate_trace_id());
    req.extensions_mut().insert(trace_id.clone());

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // Skip logging for Swagger UI static assets
    if path.starts_with("/docs") {
        return next.run(req).await;
    }

    let mc = method_color(&method);
    println!(
        "{GRAY}{}{RESET} {CYAN}-->{RESET} [{}] {mc}{method}{RESET} {path}",
        now_str(),
        trace_id.0
    );

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed_us = start.elapsed().as_micros();

    let status = response.status();
    let status_color = if status.is_success() {
        GREEN
    } else if status.is_client_error() {
        YELLOW
    } else {
        RED
    };
    println!(
        "{GRAY}{}{RESET} {status_color}<--{RESET} [{}] {status_color}{status}{RESET} {}",
        now_str(),
        trace_id.0,
        format_elapsed(elapsed_us)
    );

    if let Ok(val) = HeaderValue::from_str(&trace_id.0) {
        response.headers_mut().insert("X-Trace-Id", val);
    }
    response
}
