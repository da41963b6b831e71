//! Canonical content digests.
//!
//! Deduplication keys on the SHA-256 of *canonical* bytes, so trivially
//! different encodings of the same text (trailing whitespace, CRLF line
//! endings) collapse to one atom. Binary payloads are hashed as-is.

use crate::Modality;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// 256-bit digest of canonical content bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Stripe selector for the store's per-hash lock table.
    pub fn stripe(&self, stripes: usize) -> usize {
        // First 8 bytes are uniformly distributed already
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_le_bytes(prefix) % stripes as u64) as usize
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…")
    }
}

/// Canonicalize content for hashing.
///
/// Text: CRLF → LF, then leading/trailing ASCII whitespace trimmed.
/// Binary: unchanged.
pub fn canonicalize(content: &[u8], modality: Modality) -> Cow<'_, [u8]> {
    match modality {
        Modality::Binary => Cow::Borrowed(content),
        Modality::Text => {
            let trimmed = trim_ascii(content);
            if trimmed.contains(&b'\r') {
                let mut out = Vec::with_capacity(trimmed.len());
                let mut i = 0;
                while i < trimmed.len() {
                    if trimmed[i] == b'\r' && trimmed.get(i + 1) == Some(&b'\n') {
                        out.push(b'\n');
                        i += 2;
                    } else {
                        out.push(trimmed[i]);
                        i += 1;
                    }
                }
                Cow::Owned(out)
            } else if trimmed.len() == content.len() {
                Cow::Borrowed(content)
            } else {
                Cow::Borrowed(trimmed)
            }
        }
    }
}

/// Hash content under its modality's canonical form.
pub fn content_hash(content: &[u8], modality: Modality) -> ContentHash {
    let canonical = canonicalize(content, modality);
    let digest = Sha256::digest(canonical.as_ref());
    ContentHash(digest.into())
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_hash_exact() {
        let a = content_hash(b"hello", Modality::Binary);
        let b = content_hash(b"hello", Modality::Binary);
        let c = content_hash(b"hello ", Modality::Binary);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_text_trims_whitespace() {
        let a = content_hash(b"hello world", Modality::Text);
        let b = content_hash(b"  hello world\n\n", Modality::Text);
        assert_eq!(a, b);
    }

    #[test]
    fn test_text_normalizes_crlf() {
        let a = content_hash(b"line one\nline two", Modality::Text);
        let b = content_hash(b"line one\r\nline two", Modality::Text);
        assert_eq!(a, b);

        // A lone carriage return is content, not a line ending
        let c = content_hash(b"line one\rline two", Modality::Text);
        assert_ne!(a, c);
    }

    #[test]
    fn test_modality_distinguishes() {
        // Same bytes under different modality canonicalization can differ
        let text = content_hash(b" x ", Modality::Text);
        let binary = content_hash(b" x ", Modality::Binary);
        assert_ne!(text, binary);
    }

    #[test]
    fn test_stripe_in_range() {
        let hash = content_hash(b"anything", Modality::Binary);
        for stripes in [1, 16, 64] {
            assert!(hash.stripe(stripes) < stripes);
        }
    }

    #[test]
    fn test_empty_text() {
        let a = content_hash(b"", Modality::Text);
        let b = content_hash(b"   ", Modality::Text);
        assert_eq!(a, b);
    }
}
