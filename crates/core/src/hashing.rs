use std::path::Path;

use sha2::{Digest, Sha256};

use crate::model::Diff;

/// Stable content fingerprint for a diff, used as the notification dedup key.
///
/// Notes:
/// - Serialized with serde_json, relying on deterministic struct field order.
/// - Order-sensitive: the same entries in a different order fingerprint differently.
pub fn diff_fingerprint(diff: &Diff) -> String {
    // Serializing plain structs of strings cannot fail.
    let bytes = serde_json::to_vec(diff).unwrap_or_default();
    sha256_hex(&bytes)
}

/// Fingerprint of a file's contents. A missing or unreadable file hashes as empty.
pub async fn file_fingerprint(path: &Path) -> String {
    let bytes = tokio::fs::read(path).await.unwrap_or_default();
    sha256_hex(&bytes)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Item;

    fn diff_of(ids: &[&str]) -> Diff {
        Diff {
            added: ids.iter().map(|id| Item::new(*id, "t", "d")).collect(),
            ..Diff::default()
        }
    }

    #[test]
    fn same_content_same_fingerprint() {
        assert_eq!(diff_fingerprint(&diff_of(&["a", "b"])), diff_fingerprint(&diff_of(&["a", "b"])));
    }

    #[test]
    fn order_matters() {
        assert_ne!(diff_fingerprint(&diff_of(&["a", "b"])), diff_fingerprint(&diff_of(&["b", "a"])));
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = diff_fingerprint(&Diff::default());
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn missing_file_hashes_like_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.lock");
        tokio::fs::write(&empty, b"").await.unwrap();

        let missing = file_fingerprint(&dir.path().join("nope.lock")).await;
        assert_eq!(missing, file_fingerprint(&empty).await);
    }
}
