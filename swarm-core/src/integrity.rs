//! Integrity: SHA-256 content digests for chunks and whole files, hex encoded.

use sha2::{Digest, Sha256};

/// Hash a chunk payload. Returns the lowercase hex digest used as the chunk's name.
pub fn hash_chunk(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Verify chunk payload against expected hex digest.
pub fn verify_chunk(payload: &[u8], expected_hash: &str) -> bool {
    hash_chunk(payload).eq_ignore_ascii_case(expected_hash)
}

/// True if `s` looks like a digest produced by [`hash_chunk`]. Guards store paths built from peer input.
pub fn is_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Running whole-file digest, fed chunk by chunk in piece order.
#[derive(Default)]
pub struct FileHasher {
    inner: Sha256,
    bytes: u64,
}

impl FileHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verify_roundtrip() {
        let payload = b"hello chunk";
        let hash = hash_chunk(payload);
        assert!(verify_chunk(payload, &hash));
        assert!(is_digest(&hash));
    }

    #[test]
    fn verify_rejects_tampered() {
        let payload = b"hello chunk";
        let hash = hash_chunk(payload);
        assert!(!verify_chunk(b"tampered", &hash));
    }

    #[test]
    fn known_empty_digest() {
        assert_eq!(
            hash_chunk(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut h = FileHasher::new();
        h.update(b"abc");
        h.update(b"def");
        assert_eq!(h.bytes_hashed(), 6);
        assert_eq!(h.finish(), hash_chunk(b"abcdef"));
    }

    #[test]
    fn digest_shape_rejects_paths() {
        assert!(!is_digest("../etc/passwd"));
        assert!(!is_digest(""));
        assert!(!is_digest(&"g".repeat(64)));
    }
}
