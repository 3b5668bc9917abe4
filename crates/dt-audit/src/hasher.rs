// hasher.rs — SHA-256 hashing for the audit hash chain.
//
// Every entry in the audit log is linked to its predecessor by the SHA-256
// hash of the predecessor's raw JSON line. Hashes are hex-encoded as
// 64-character lowercase strings for readability and JSON compatibility.

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a UTF-8 string, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}
