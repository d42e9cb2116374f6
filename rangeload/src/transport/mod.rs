//! HTTP transport abstraction.
//!
//! Downloads talk to the network only through [`HttpTransport`], which keeps
//! the fetchers independent of the HTTP client and lets tests swap in the
//! in-memory `MemoryTransport` (behind the `test-utils` feature).
//!
//! # Implementations
//!
//! - [`ReqwestTransport`] - pooled reqwest client, built once and shared
//! - `MemoryTransport` - serves a byte buffer with configurable server quirks
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so a single `Arc<dyn HttpTransport>` can be
//! handed to every fetcher task of every session.

mod http;
#[cfg(any(test, feature = "test-utils"))]
mod memory;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE};
use reqwest::StatusCode;

use crate::error::DownloadResult;

pub use http::ReqwestTransport;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryTransport, RequestCounts};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Response body as a stream of byte chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = DownloadResult<Bytes>> + Send>>;

/// Inclusive byte range sent as a `Range` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Create a range covering `start..=end`.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: a range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Create a response head.
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    /// Parsed `Content-Length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    }

    /// Byte-range capability declared by `Accept-Ranges`.
    ///
    /// `Some(true)` for `bytes`, `Some(false)` for `none` or any other unit,
    /// `None` when the header is absent.
    pub fn accepts_ranges(&self) -> Option<bool> {
        let value = self.headers.get(ACCEPT_RANGES)?.to_str().ok()?;
        Some(
            value
                .split(',')
                .any(|unit| unit.trim().eq_ignore_ascii_case("bytes")),
        )
    }

    /// Complete length declared by `Content-Range`, if present and known.
    pub fn content_range_total(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
    }
}

/// A response whose body has not been read yet.
pub struct HttpResponse {
    /// Status and headers.
    pub head: ResponseHead,
    /// Body stream; dropping it abandons the transfer.
    pub body: BodyStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

/// Trait for HTTP operations used by the downloaders.
///
/// Implementations must not transparently decode content encodings: lengths
/// reported in headers have to match the bytes yielded by the body stream.
pub trait HttpTransport: Send + Sync {
    /// Issue a HEAD request.
    fn head<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<ResponseHead>>;

    /// Issue a GET request, optionally restricted to a byte range.
    ///
    /// Resolves as soon as the headers are available; the body is streamed.
    fn get<'a>(
        &'a self,
        url: &'a str,
        range: Option<ByteRange>,
    ) -> BoxFuture<'a, DownloadResult<HttpResponse>>;
}

/// Parse the complete length out of a `Content-Range` value.
///
/// Accepts `bytes <first>-<last>/<complete>`; returns `None` for an unknown
/// (`*`) complete length or a malformed value.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (_, total) = rest.split_once('/')?;
    total.trim().parse::<u64>().ok()
}
