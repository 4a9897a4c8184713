//! Stable 128-bit fingerprints for caller-supplied identifiers.
//!
//! Used to turn URLs, track IDs and other user-facing strings into opaque,
//! disk-safe keys. The digest is BLAKE3 truncated to 16 bytes; it is not a
//! security boundary.

/// Length of a fingerprint in hex characters
pub const FINGERPRINT_LEN: usize = 32;

/// Compute the 32-character lowercase hex fingerprint of `input`.
#[inline]
pub fn fingerprint(input: &str) -> String {
    fingerprint_bytes(input.as_bytes())
}

/// Fingerprint raw bytes.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let digest = blake3::hash(data);
    hex::encode(&digest.as_bytes()[..FINGERPRINT_LEN / 2])
}

/// Check whether `s` has the shape of a fingerprint.
pub fn is_fingerprint(s: &str) -> bool {
    s.len() == FINGERPRINT_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint("https://music.example.com/watch?v=abc123");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(is_fingerprint(&fp));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint("track:42"), fingerprint("track:42"));
        assert_eq!(fingerprint(""), fingerprint_bytes(b""));
    }

    #[test]
    fn test_fingerprint_distinguishes_inputs() {
        assert_ne!(fingerprint("track:42"), fingerprint("track:43"));
        assert_ne!(fingerprint("a"), fingerprint("A"));
    }

    #[test]
    fn test_fingerprint_is_a_valid_key() {
        let fp = fingerprint("album art 512px");
        assert!(crate::key::validate_key(&fp).is_ok());
    }

    #[test]
    fn test_is_fingerprint_rejects_uppercase() {
        assert!(!is_fingerprint("ABCDEF0123456789ABCDEF0123456789"));
        assert!(!is_fingerprint("abc"));
    }
}
