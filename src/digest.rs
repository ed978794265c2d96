//! SHA256 digest utilities
//!
//! Computing, validating and formatting the `sha256:<hex>` digests that
//! address blobs in the content store and in the registry.

use crate::error::{PushError, Result};
use sha2::Digest;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const SHA256_PREFIX: &str = "sha256:";

/// Digest of zero bytes
pub const EMPTY_DIGEST: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub struct DigestUtils;

impl DigestUtils {
    /// Hex encoded SHA256 of `data`
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = sha2::Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Full digest (`sha256:` prefixed) of `data`
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("{}{}", SHA256_PREFIX, Self::compute_sha256(data))
    }

    pub fn is_valid_sha256_hex(hex_part: &str) -> bool {
        hex_part.len() == 64
            && hex_part
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    pub fn is_valid_docker_digest(digest: &str) -> bool {
        digest
            .strip_prefix(SHA256_PREFIX)
            .is_some_and(Self::is_valid_sha256_hex)
    }

    /// Extract the hex part of a full digest
    pub fn extract_hex_part(digest: &str) -> Result<&str> {
        match digest.strip_prefix(SHA256_PREFIX) {
            Some(hex_part) if Self::is_valid_sha256_hex(hex_part) => Ok(hex_part),
            _ => Err(PushError::Configuration(format!(
                "malformed sha256 digest: {}",
                digest
            ))),
        }
    }

    /// Verify data matches expected digest
    pub fn verify_data_integrity(data: &[u8], expected_digest: &str) -> Result<()> {
        let expected_hex = Self::extract_hex_part(expected_digest)?;
        let computed = Self::compute_sha256(data);

        if computed != expected_hex {
            return Err(PushError::Environment(format!(
                "data integrity check failed: expected {}, computed sha256:{}",
                expected_digest, computed
            )));
        }
        Ok(())
    }

    /// Hash everything `reader` yields and compare it with `expected_digest`.
    /// Returns the number of bytes read.
    pub async fn verify_reader<R>(mut reader: R, expected_digest: &str) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let expected_hex = Self::extract_hex_part(expected_digest)?;
        let mut hasher = sha2::Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }

        let computed = hex::encode(hasher.finalize());
        if computed != expected_hex {
            return Err(PushError::Environment(format!(
                "data integrity check failed: expected {}, computed sha256:{}",
                expected_digest, computed
            )));
        }
        Ok(total)
    }

    /// Shortened form for log lines
    pub fn short(digest: &str) -> &str {
        let hex_part = digest.strip_prefix(SHA256_PREFIX).unwrap_or(digest);
        &hex_part[..hex_part.len().min(12)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_docker_digest() {
        let digest = DigestUtils::compute_docker_digest(b"hello world");
        assert_eq!(
            digest,
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(DigestUtils::compute_docker_digest(b""), EMPTY_DIGEST);
    }

    #[test]
    fn test_validate_digest() {
        assert!(DigestUtils::is_valid_docker_digest(
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        ));
        assert!(!DigestUtils::is_valid_docker_digest("sha256:invalid"));
        assert!(!DigestUtils::is_valid_docker_digest(
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        ));
        assert!(!DigestUtils::is_valid_docker_digest(
            "sha256:B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9"
        ));
    }

    #[test]
    fn test_verify_data_integrity() {
        let digest = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        assert!(DigestUtils::verify_data_integrity(b"hello world", digest).is_ok());

        let wrong = "sha256:0000000000000000000000000000000000000000000000000000000000000000";
        assert!(matches!(
            DigestUtils::verify_data_integrity(b"hello world", wrong),
            Err(PushError::Environment(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_reader() {
        let digest = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        let read = DigestUtils::verify_reader(&b"hello world"[..], digest)
            .await
            .unwrap();
        assert_eq!(read, 11);

        let err = DigestUtils::verify_reader(&b"hello there"[..], digest)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("integrity check failed"));
    }

    #[test]
    fn test_short() {
        assert_eq!(DigestUtils::short(EMPTY_DIGEST), "e3b0c44298fc");
        assert_eq!(DigestUtils::short("abc"), "abc");
    }
}
