use sha2::{Digest, Sha256};

/// Stable entry id for a paper link: hex SHA-256 of the link's UTF-8 bytes.
pub fn identify(link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    hex::encode(hasher.finalize())
}
