//! Console trace of proxied requests and responses.
//!
//! Every request is written as its request line followed by the header
//! block, every response as its status line followed by the header block.

use http::{HeaderMap, request};
use tracing::info;

use crate::capture::CapturedResponse;

/// Sink for the per-request trace of a proxy instance.
pub trait Trace: Send + Sync + 'static {
    /// Called once per request, before it is forwarded.
    fn request(&self, proxy: &str, parts: &request::Parts);

    /// Called once per request, after the response has been committed.
    fn response(&self, proxy: &str, captured: &CapturedResponse, headers: &HeaderMap);
}

/// Writes traces through `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleTrace;

impl Trace for ConsoleTrace {
    fn request(&self, proxy: &str, parts: &request::Parts) {
        info!(
            proxy,
            "{} {} {:?}\n{}",
            parts.method,
            parts.uri,
            parts.version,
            format_headers(&parts.headers)
        );
    }

    fn response(&self, proxy: &str, captured: &CapturedResponse, headers: &HeaderMap) {
        info!(
            proxy,
            "{} {}\n{}",
            captured.code(),
            captured.reason(),
            format_headers(headers)
        );
    }
}

/// Renders a header block as `name: value` lines.
///
/// Values that are not valid UTF-8 are rendered lossily.
pub fn format_headers(headers: &HeaderMap) -> String {
    let mut block = String::new();
    for (name, value) in headers {
        block.push_str(name.as_str());
        block.push_str(": ");
        block.push_str(&String::from_utf8_lossy(value.as_bytes()));
        block.push('\n');
    }
    block
}
