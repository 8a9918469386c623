//! Short content hashes for config identity and dedup fingerprints.
//!
//! Both uses want a compact, stable identifier rather than cryptographic
//! strength, so we truncate SHA-256 to its first 16 hex characters.

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes to a 16-character lowercase hex string.
///
/// Deterministic for a given input, including the empty input.
pub fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// Identity hash used to deduplicate track items.
///
/// Built from the normalized artist and title plus the external catalog ID
/// when one is known. Normalization lowercases, trims, and collapses
/// internal whitespace so cosmetic differences don't defeat dedup.
pub fn track_fingerprint(artist: &str, title: &str, external_id: Option<&str>) -> String {
    let identity = match external_id {
        Some(id) if !id.is_empty() => {
            format!("{}|{}|{}", normalize(artist), normalize(title), id)
        }
        _ => format!("{}|{}", normalize(artist), normalize(title)),
    };
    short_hash(identity.as_bytes())
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_is_deterministic() {
        assert_eq!(short_hash(b"hello"), short_hash(b"hello"));
        assert_ne!(short_hash(b"hello"), short_hash(b"world"));
    }

    #[test]
    fn test_short_hash_length_is_16_hex() {
        for input in [&b""[..], b"a", b"some longer input with spaces"] {
            let hash = short_hash(input);
            assert_eq!(hash.len(), 16);
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_fingerprint_normalizes_case_and_whitespace() {
        let a = track_fingerprint("The  Beatles", "Let It Be", None);
        let b = track_fingerprint("the beatles", "  let it be ", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_external_id_distinguishes() {
        let a = track_fingerprint("Artist", "Title", Some("id-1"));
        let b = track_fingerprint("Artist", "Title", Some("id-2"));
        let c = track_fingerprint("Artist", "Title", None);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_external_id_same_as_none() {
        assert_eq!(
            track_fingerprint("Artist", "Title", Some("")),
            track_fingerprint("Artist", "Title", None)
        );
    }
}
