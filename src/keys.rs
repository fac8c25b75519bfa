//! Usage: Credential identity — opaque API keys and their persisted fingerprints.

use sha2::{Digest, Sha256};

/// A stable 16-hex-character fingerprint of an [`APIKey`]. Only this form is ever
/// persisted; the plaintext key never touches disk.
pub type KeyId = String;

/// Derive the fingerprint used to identify a key in cooldown/pending state without
/// storing the credential itself.
pub fn key_id(key: &str) -> KeyId {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..8])
}

/// A short, non-sensitive preview of a key suitable for log lines and error summaries
/// (10-char prefix, 4-char suffix — never enough to reconstruct the credential).
pub fn preview(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 14 {
        return "*".repeat(chars.len());
    }
    let prefix: String = chars[..10].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}...{suffix}")
}
