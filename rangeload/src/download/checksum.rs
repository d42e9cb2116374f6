//! SHA-256 checksum calculation for downloaded files.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{DownloadError, DownloadResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Calculate SHA-256 checksum of a file.
///
/// # Returns
///
/// The lowercase hexadecimal SHA-256 hash of the file contents.
///
/// # Errors
///
/// Returns `ReadFailed` if the file cannot be read.
pub fn calculate_file_checksum(path: &Path) -> DownloadResult<String> {
    let read_failed = |source| DownloadError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_failed)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(read_failed)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify that a file matches an expected checksum.
///
/// Returns the actual checksum on success.
pub fn verify_checksum(path: &Path, expected: &str) -> DownloadResult<String> {
    let actual = calculate_file_checksum(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(DownloadError::ChecksumMismatch {
            filename: path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(actual)
}

/// [`verify_checksum`] on the blocking thread pool.
pub async fn verify_checksum_async(path: PathBuf, expected: String) -> DownloadResult<String> {
    tokio::task::spawn_blocking(move || verify_checksum(&path, &expected))
        .await
        .map_err(|e| DownloadError::TaskFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn hello_file(temp: &TempDir) -> PathBuf {
        let file_path = temp.path().join("test.txt");
        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"hello world").unwrap();
        file_path
    }

    #[test]
    fn test_calculate_file_checksum() {
        let temp = TempDir::new().unwrap();
        let checksum = calculate_file_checksum(&hello_file(&temp)).unwrap();
        assert_eq!(checksum, HELLO_WORLD);
    }

    #[test]
    fn test_calculate_empty_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("empty.txt");
        File::create(&file_path).unwrap();

        let checksum = calculate_file_checksum(&file_path).unwrap();

        // SHA-256 of empty string
        assert_eq!(
            checksum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_calculate_nonexistent_file() {
        let result = calculate_file_checksum(Path::new("/nonexistent/file.txt"));
        assert!(matches!(result, Err(DownloadError::ReadFailed { .. })));
    }

    #[test]
    fn test_verify_checksum_mismatch() {
        let temp = TempDir::new().unwrap();
        let result = verify_checksum(&hello_file(&temp), "wrong_checksum");

        match result {
            Err(DownloadError::ChecksumMismatch {
                filename, actual, ..
            }) => {
                assert_eq!(filename, "test.txt");
                assert_eq!(actual, HELLO_WORLD);
            }
            other => panic!("Expected ChecksumMismatch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_checksum_async_match() {
        let temp = TempDir::new().unwrap();
        let actual = verify_checksum_async(hello_file(&temp), HELLO_WORLD.to_uppercase())
            .await
            .unwrap();
        assert_eq!(actual, HELLO_WORLD);
    }
}
