// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SHA-256 fingerprints for audit records.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fingerprint a checkout session id for storage in the decision log.
///
/// Surrounding whitespace is ignored so the same session always maps to the
/// same fingerprint.
pub fn session_fingerprint(session_id: &str) -> String {
    hash_bytes(session_id.trim().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SHA-256 of the empty byte slice (well-known constant).
    const EMPTY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn hash_empty_input() {
        assert_eq!(hash_bytes(b""), EMPTY_SHA256);
    }

    #[test]
    fn hash_known_value() {
        // SHA-256("hello"): verified against coreutils sha256sum.
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(hash_bytes(b"hello"), expected);
    }

    #[test]
    fn fingerprint_ignores_padding() {
        assert_eq!(session_fingerprint(" cs_1 "), session_fingerprint("cs_1"));
        assert_ne!(session_fingerprint("cs_1"), session_fingerprint("cs_2"));
        assert_eq!(session_fingerprint("hello"), hash_bytes(b"hello"));
    }
}
