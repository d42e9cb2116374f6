//! Per-call download parameters and results.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;

use super::strategy::StrategyKind;
use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::{DownloadError, DownloadResult};

/// What to download and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    url: String,
    dest_dir: PathBuf,
    file_name: String,
    buffer_size: usize,
    expected_sha256: Option<String>,
}

impl DownloadRequest {
    /// Request `url` to be saved as `dest_dir/file_name`.
    pub fn new(
        url: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            dest_dir: dest_dir.into(),
            file_name: file_name.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            expected_sha256: None,
        }
    }

    /// Set the size of each disk write.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Verify the finished file against a SHA-256 digest (hex).
    pub fn with_expected_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into().to_ascii_lowercase());
        self
    }

    /// Source URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Directory the file is written into; created if missing.
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Name of the destination file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Size of each disk write.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Expected SHA-256, lowercase hex.
    pub fn expected_sha256(&self) -> Option<&str> {
        self.expected_sha256.as_deref()
    }

    /// Full destination path.
    pub fn destination(&self) -> PathBuf {
        self.dest_dir.join(&self.file_name)
    }

    /// Reject requests that cannot succeed, before any I/O.
    pub fn validate(&self) -> DownloadResult<()> {
        if self.url.trim().is_empty() {
            return Err(DownloadError::InvalidArgument(
                "URL must not be empty".to_string(),
            ));
        }
        Url::parse(&self.url).map_err(|e| {
            DownloadError::InvalidArgument(format!("invalid URL '{}': {}", self.url, e))
        })?;

        // A bare name only: no separators, no `.` or `..`.
        let is_bare_name = Path::new(&self.file_name)
            .file_name()
            .is_some_and(|name| name == self.file_name.as_str());
        if self.file_name.is_empty() || !is_bare_name {
            return Err(DownloadError::InvalidArgument(format!(
                "invalid file name '{}'",
                self.file_name
            )));
        }

        if self.buffer_size == 0 {
            return Err(DownloadError::InvalidArgument(
                "buffer size must be positive".to_string(),
            ));
        }

        if let Some(digest) = &self.expected_sha256 {
            if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(DownloadError::InvalidArgument(format!(
                    "expected SHA-256 '{}' is not 64 hex digits",
                    digest
                )));
            }
        }

        Ok(())
    }
}

/// Summary of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Path of the written file.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes_written: u64,
    /// Strategy that produced the file.
    pub strategy: StrategyKind,
    /// Number of concurrent fetchers (1 for single-stream).
    pub chunks: usize,
    /// Wall-clock time of the session.
    pub elapsed: Duration,
    /// SHA-256 of the file, when verification was requested.
    pub sha256: Option<String>,
}

impl DownloadReport {
    /// Average throughput in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_written as f64 / secs
        } else {
            self.bytes_written as f64
        }
    }
}

impl fmt::Display for DownloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes to {} via {} ({} chunk(s)) in {:.2}s",
            self.bytes_written,
            self.path.display(),
            self.strategy,
            self.chunks,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> DownloadRequest {
        DownloadRequest::new("https://example.com/a.bin", "/tmp/dl", "a.bin")
    }

    #[test]
    fn test_defaults() {
        let request = valid();
        assert_eq!(request.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(request.expected_sha256(), None);
        assert_eq!(request.destination(), PathBuf::from("/tmp/dl/a.bin"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_empty_url_rejected() {
        let request = DownloadRequest::new("", "/tmp", "a.bin");
        assert!(matches!(
            request.validate(),
            Err(DownloadError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_malformed_url_rejected() {
        let request = DownloadRequest::new("not a url", "/tmp", "a.bin");
        assert!(matches!(
            request.validate(),
            Err(DownloadError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_bad_file_names_rejected() {
        for name in ["", "..", ".", "sub/a.bin", "../a.bin"] {
            let request = DownloadRequest::new("https://example.com/a", "/tmp", name);
            assert!(
                matches!(request.validate(), Err(DownloadError::InvalidArgument(_))),
                "accepted {:?}",
                name
            );
        }
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let request = valid().with_buffer_size(0);
        assert!(matches!(
            request.validate(),
            Err(DownloadError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_expected_digest_normalized_and_checked() {
        let digest = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";
        let request = valid().with_expected_sha256(digest);
        assert_eq!(request.expected_sha256(), Some(digest.to_ascii_lowercase().as_str()));
        assert!(request.validate().is_ok());

        let request = valid().with_expected_sha256("abc");
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_report_throughput() {
        let report = DownloadReport {
            path: PathBuf::from("/tmp/a.bin"),
            bytes_written: 2000,
            strategy: StrategyKind::MultiStream,
            chunks: 4,
            elapsed: Duration::from_secs(2),
            sha256: None,
        };
        assert_eq!(report.bytes_per_second(), 1000.0);
        assert!(report.to_string().contains("multi-stream"));
    }
}
