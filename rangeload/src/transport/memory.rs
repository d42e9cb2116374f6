//! In-memory transport.
//!
//! Serves a single byte buffer for every URL and can imitate the server
//! behaviours the downloaders must cope with: missing HEAD support, ignored
//! `Range` headers, absent length headers, truncated and stalled bodies.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE};
use reqwest::StatusCode;

use super::{BoxFuture, BodyStream, ByteRange, HttpResponse, HttpTransport, ResponseHead};
use crate::error::{DownloadError, DownloadResult};

/// Default size of the pieces a body is delivered in (16 KiB).
const DEFAULT_BODY_CHUNK: usize = 16 * 1024;

/// Number of requests served, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    /// HEAD requests.
    pub head: usize,
    /// GET requests carrying a `Range` header.
    pub ranged_get: usize,
    /// GET requests without a `Range` header.
    pub full_get: usize,
}

#[derive(Debug, Default)]
struct Counters {
    head: AtomicUsize,
    ranged_get: AtomicUsize,
    full_get: AtomicUsize,
}

/// Transport serving a fixed buffer from memory.
#[derive(Debug)]
pub struct MemoryTransport {
    data: Bytes,
    head_supported: bool,
    head_fails: bool,
    advertise_ranges: bool,
    ranges_supported: bool,
    claims_ranges: bool,
    report_length: bool,
    truncate_at: Option<u64>,
    stall_after: Option<u64>,
    body_chunk: usize,
    counters: Counters,
}

impl MemoryTransport {
    /// Serve `data` with full HEAD and byte-range support.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            head_supported: true,
            head_fails: false,
            advertise_ranges: true,
            ranges_supported: true,
            claims_ranges: false,
            report_length: true,
            truncate_at: None,
            stall_after: None,
            body_chunk: DEFAULT_BODY_CHUNK,
            counters: Counters::default(),
        }
    }

    /// Answer HEAD with `405 Method Not Allowed`.
    pub fn without_head(mut self) -> Self {
        self.head_supported = false;
        self
    }

    /// Fail HEAD requests with a network error.
    pub fn failing_head(mut self) -> Self {
        self.head_fails = true;
        self
    }

    /// Omit `Accept-Ranges` while still honouring `Range`.
    pub fn without_accept_ranges_header(mut self) -> Self {
        self.advertise_ranges = false;
        self
    }

    /// Ignore `Range` and answer `Accept-Ranges: none`.
    pub fn without_ranges(mut self) -> Self {
        self.ranges_supported = false;
        self
    }

    /// Ignore `Range` without sending any `Accept-Ranges` header.
    pub fn ignoring_ranges_silently(mut self) -> Self {
        self.ranges_supported = false;
        self.advertise_ranges = false;
        self
    }

    /// Advertise `Accept-Ranges: bytes` but answer every GET in full.
    pub fn advertising_unhonoured_ranges(mut self) -> Self {
        self.ranges_supported = false;
        self.claims_ranges = true;
        self
    }

    /// Omit `Content-Length` from HEAD and full GET responses.
    pub fn without_content_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    /// End every body once the absolute offset `offset` is reached.
    pub fn truncated_at(mut self, offset: u64) -> Self {
        self.truncate_at = Some(offset);
        self
    }

    /// Stop making progress after each body has delivered `bytes` bytes.
    pub fn stalling_after(mut self, bytes: u64) -> Self {
        self.stall_after = Some(bytes);
        self
    }

    /// Deliver bodies in pieces of `size` bytes.
    pub fn with_body_chunk_size(mut self, size: usize) -> Self {
        self.body_chunk = size.max(1);
        self
    }

    /// The served content.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Snapshot of how many requests have been served.
    pub fn request_counts(&self) -> RequestCounts {
        RequestCounts {
            head: self.counters.head.load(Ordering::SeqCst),
            ranged_get: self.counters.ranged_get.load(Ordering::SeqCst),
            full_get: self.counters.full_get.load(Ordering::SeqCst),
        }
    }

    fn total(&self) -> u64 {
        self.data.len() as u64
    }

    fn entity_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let accept = if self.ranges_supported || self.claims_ranges {
            "bytes"
        } else {
            "none"
        };
        if self.advertise_ranges {
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static(accept));
        }
        if self.report_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(self.total()));
        }
        headers
    }

    fn body(&self, start: u64, end_exclusive: u64) -> BodyStream {
        let end = self
            .truncate_at
            .map_or(end_exclusive, |limit| limit.clamp(start, end_exclusive));
        let end = self
            .stall_after
            .map_or(end, |budget| end.min(start.saturating_add(budget)));

        let pieces: Vec<DownloadResult<Bytes>> = (start..end)
            .step_by(self.body_chunk)
            .map(|offset| {
                let piece_end = (offset + self.body_chunk as u64).min(end);
                Ok(self.data.slice(offset as usize..piece_end as usize))
            })
            .collect();

        let body = stream::iter(pieces);
        if self.stall_after.is_some() {
            Box::pin(body.chain(stream::pending()))
        } else {
            Box::pin(body)
        }
    }

    fn ranged_response(&self, range: ByteRange) -> HttpResponse {
        let total = self.total();
        if range.start >= total || range.end < range.start {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", total)) {
                headers.insert(CONTENT_RANGE, value);
            }
            return HttpResponse {
                head: ResponseHead::new(StatusCode::RANGE_NOT_SATISFIABLE, headers),
                body: Box::pin(stream::empty()),
            };
        }

        let last = range.end.min(total - 1);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(last - range.start + 1));
        if let Ok(value) =
            HeaderValue::from_str(&format!("bytes {}-{}/{}", range.start, last, total))
        {
            headers.insert(CONTENT_RANGE, value);
        }

        HttpResponse {
            head: ResponseHead::new(StatusCode::PARTIAL_CONTENT, headers),
            body: self.body(range.start, last + 1),
        }
    }
}

impl HttpTransport for MemoryTransport {
    fn head<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<ResponseHead>> {
        Box::pin(async move {
            self.counters.head.fetch_add(1, Ordering::SeqCst);

            if self.head_fails {
                return Err(DownloadError::network(url, "connection reset by peer"));
            }
            if !self.head_supported {
                return Ok(ResponseHead::new(
                    StatusCode::METHOD_NOT_ALLOWED,
                    HeaderMap::new(),
                ));
            }

            Ok(ResponseHead::new(StatusCode::OK, self.entity_headers()))
        })
    }

    fn get<'a>(
        &'a self,
        _url: &'a str,
        range: Option<ByteRange>,
    ) -> BoxFuture<'a, DownloadResult<HttpResponse>> {
        Box::pin(async move {
            match range {
                Some(range) => {
                    self.counters.ranged_get.fetch_add(1, Ordering::SeqCst);
                    if self.ranges_supported {
                        return Ok(self.ranged_response(range));
                    }
                }
                None => {
                    self.counters.full_get.fetch_add(1, Ordering::SeqCst);
                }
            }

            Ok(HttpResponse {
                head: ResponseHead::new(StatusCode::OK, self.entity_headers()),
                body: self.body(0, self.total()),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(body: BodyStream) -> Vec<u8> {
        body.map(|chunk| chunk.unwrap())
            .fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                acc
            })
            .await
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_head_reports_length_and_ranges() {
        let transport = MemoryTransport::new(sample(1000));
        let head = transport.head("mem://file").await.unwrap();

        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.content_length(), Some(1000));
        assert_eq!(head.accepts_ranges(), Some(true));
        assert_eq!(transport.request_counts().head, 1);
    }

    #[tokio::test]
    async fn test_ranged_get_returns_slice() {
        let data = sample(1000);
        let transport = MemoryTransport::new(data.clone()).with_body_chunk_size(7);
        let response = transport
            .get("mem://file", Some(ByteRange::new(100, 199)))
            .await
            .unwrap();

        assert_eq!(response.head.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.head.content_range_total(), Some(1000));
        assert_eq!(collect(response.body).await, data[100..200].to_vec());
        assert_eq!(transport.request_counts().ranged_get, 1);
    }

    #[tokio::test]
    async fn test_range_ignored_when_unsupported() {
        let data = sample(300);
        let transport = MemoryTransport::new(data.clone()).without_ranges();
        let response = transport
            .get("mem://file", Some(ByteRange::new(0, 0)))
            .await
            .unwrap();

        assert_eq!(response.head.status, StatusCode::OK);
        assert_eq!(response.head.accepts_ranges(), Some(false));
        assert_eq!(collect(response.body).await, data);
    }

    #[tokio::test]
    async fn test_range_ignored_silently() {
        let data = sample(300);
        let transport = MemoryTransport::new(data.clone()).ignoring_ranges_silently();

        let head = transport.head("mem://file").await.unwrap();
        assert_eq!(head.content_length(), Some(300));
        assert_eq!(head.accepts_ranges(), None);

        let response = transport
            .get("mem://file", Some(ByteRange::new(0, 0)))
            .await
            .unwrap();
        assert_eq!(response.head.status, StatusCode::OK);
        assert_eq!(collect(response.body).await, data);
    }

    #[tokio::test]
    async fn test_range_past_end_not_satisfiable() {
        let transport = MemoryTransport::new(sample(10));
        let response = transport
            .get("mem://file", Some(ByteRange::new(10, 20)))
            .await
            .unwrap();
        assert_eq!(response.head.status, StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let transport = MemoryTransport::new(sample(1000)).truncated_at(600);
        let response = transport.get("mem://file", None).await.unwrap();

        assert_eq!(response.head.content_length(), Some(1000));
        assert_eq!(collect(response.body).await.len(), 600);
    }

    #[tokio::test]
    async fn test_head_unsupported_and_failing() {
        let transport = MemoryTransport::new(sample(10)).without_head();
        let head = transport.head("mem://file").await.unwrap();
        assert_eq!(head.status, StatusCode::METHOD_NOT_ALLOWED);

        let transport = MemoryTransport::new(sample(10)).failing_head();
        assert!(transport.head("mem://file").await.unwrap_err().is_network());
    }
}
