//! Resource size and byte-range capability detection.
//!
//! Resolution is a three-stage cascade, each stage tried only when the one
//! before it produced no usable size:
//!
//! 1. `HEAD` - success status, `Accept-Ranges: bytes` and a positive length
//! 2. `GET` with `Range: bytes=0-0` - `206` with `Content-Range: bytes 0-0/N`
//! 3. plain `GET`, headers only - positive `Content-Length`
//!
//! Network failures in stages 1 and 2 are logged and skipped; a failure in
//! stage 3 is returned to the caller.

use std::fmt;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DownloadError, DownloadResult};
use crate::transport::{ByteRange, HttpTransport};

/// The resolver stage that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    /// `HEAD` request.
    Head,
    /// Single-byte ranged `GET`.
    RangeProbe,
    /// Unranged `GET`.
    FullRequest,
}

impl fmt::Display for ProbeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStage::Head => write!(f, "HEAD"),
            ProbeStage::RangeProbe => write!(f, "range probe"),
            ProbeStage::FullRequest => write!(f, "full GET"),
        }
    }
}

/// Size and range support of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCapabilities {
    /// Total size in bytes (always positive).
    pub total_size: u64,
    /// Whether the server honours byte-range requests.
    pub range_supported: bool,
    /// Stage that produced the answer.
    pub stage: ProbeStage,
}

/// Outcome of the HEAD probe.
enum HeadProbe {
    /// Usable length; range capability declared (`Some`) or unknown (`None`).
    Length(u64, Option<bool>),
    /// No usable length.
    Nothing,
}

/// Determines resource size and byte-range support.
pub struct CapabilityResolver<'a> {
    transport: &'a dyn HttpTransport,
}

impl<'a> CapabilityResolver<'a> {
    /// Create a resolver using `transport`.
    pub fn new(transport: &'a dyn HttpTransport) -> Self {
        Self { transport }
    }

    /// Resolve `url`, honouring `cancel` at every request.
    pub async fn resolve(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> DownloadResult<ResourceCapabilities> {
        let head_length = match cancellable(cancel, self.probe_head(url)).await? {
            HeadProbe::Length(total_size, Some(range_supported)) => {
                debug!(url, total_size, range_supported, "Resolved size from HEAD");
                return Ok(ResourceCapabilities {
                    total_size,
                    range_supported,
                    stage: ProbeStage::Head,
                });
            }
            HeadProbe::Length(total_size, None) => Some(total_size),
            HeadProbe::Nothing => None,
        };

        if let Some(total_size) = cancellable(cancel, self.probe_range(url)).await? {
            debug!(url, total_size, "Resolved size from range probe");
            return Ok(ResourceCapabilities {
                total_size,
                range_supported: true,
                stage: ProbeStage::RangeProbe,
            });
        }

        if let Some(total_size) = head_length {
            debug!(
                url,
                total_size, "Range probe failed, using HEAD length without range support"
            );
            return Ok(ResourceCapabilities {
                total_size,
                range_supported: false,
                stage: ProbeStage::Head,
            });
        }

        let total_size = cancellable(cancel, self.probe_full(url)).await?;
        debug!(url, total_size, "Resolved size from full GET");
        Ok(ResourceCapabilities {
            total_size,
            range_supported: false,
            stage: ProbeStage::FullRequest,
        })
    }

    async fn probe_head(&self, url: &str) -> DownloadResult<HeadProbe> {
        let head = match self.transport.head(url).await {
            Ok(head) => head,
            Err(e) => {
                warn!(url, error = %e, "HEAD probe failed");
                return Ok(HeadProbe::Nothing);
            }
        };

        if !head.status.is_success() {
            debug!(url, status = %head.status, "HEAD probe rejected");
            return Ok(HeadProbe::Nothing);
        }

        match head.content_length() {
            Some(len) if len > 0 => Ok(HeadProbe::Length(len, head.accepts_ranges())),
            _ => Ok(HeadProbe::Nothing),
        }
    }

    async fn probe_range(&self, url: &str) -> DownloadResult<Option<u64>> {
        let response = match self.transport.get(url, Some(ByteRange::new(0, 0))).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "Range probe failed");
                return Ok(None);
            }
        };

        if response.head.status != StatusCode::PARTIAL_CONTENT {
            debug!(url, status = %response.head.status, "Range probe not honoured");
            return Ok(None);
        }

        Ok(response.head.content_range_total().filter(|&total| total > 0))
    }

    async fn probe_full(&self, url: &str) -> DownloadResult<u64> {
        let response = self.transport.get(url, None).await?;

        if !response.head.status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: response.head.status.as_u16(),
            });
        }

        response
            .head
            .content_length()
            .filter(|&len| len > 0)
            .ok_or_else(|| DownloadError::SizeUndetermined {
                url: url.to_string(),
            })
    }
}

/// Race `future` against `cancel`.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl std::future::Future<Output = DownloadResult<T>>,
) -> DownloadResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        result = future => result,
    }
}
