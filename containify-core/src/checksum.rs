//! Content checksums for intermediate-image tags
//!
//! Intermediate images are addressed by the SHA-256 of their Dockerfile
//! bytes, so the runtime's image store doubles as a content-addressed cache.

use sha2::{Digest, Sha256};

/// SHA-256 of a byte buffer as a lowercase hex string.
///
/// The result is a pure function of the bytes; no timestamps or host
/// state may enter an image tag.
pub fn content_tag(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_tag_is_hex_sha256() {
        let tag = content_tag(b"hello world");
        assert_eq!(tag.len(), 64);
        assert_eq!(
            tag,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_content_tag_is_deterministic() {
        let a = content_tag(b"FROM golang:1.24.2-alpine\n");
        let b = content_tag(b"FROM golang:1.24.2-alpine\n");
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_tag_changes_with_bytes() {
        let a = content_tag(b"FROM golang:1.24.2-alpine\n");
        let b = content_tag(b"FROM golang:1.24.3-alpine\n");
        assert_ne!(a, b);
    }
}
