//! Token persistence: single token files and a sled-backed token store

use std::path::Path;

use sled::Db;
use tracing::debug;

use kts_core::Token;
use kts_types::{Imprint, TimestampToken};

use crate::{ClientError, Result};

/// Write a token to `path` in its serialized form
pub fn save_token<T: Token>(path: &Path, token: &T) -> Result<()> {
    let bytes = token
        .to_bytes()
        .map_err(|e| ClientError::Storage(format!("Failed to serialize token: {}", e)))?;
    std::fs::write(path, bytes)
        .map_err(|e| ClientError::Storage(format!("Failed to write {}: {}", path.display(), e)))?;
    debug!("Saved token to {}", path.display());
    Ok(())
}

/// Read a token written by [`save_token`]
pub fn load_token<T: Token>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)
        .map_err(|e| ClientError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
    T::from_bytes(&bytes)
        .map_err(|e| ClientError::Storage(format!("Invalid token in {}: {}", path.display(), e)))
}

/// Local store of timestamp tokens, keyed by document imprint
pub struct TokenStore {
    db: Db,
}

impl TokenStore {
    /// Open or create a token store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| ClientError::Storage(format!("Failed to open database: {}", e)))?;

        Ok(Self { db })
    }

    /// Store a token, replacing any earlier token for the same imprint
    pub fn store(&self, token: &TimestampToken) -> Result<()> {
        let key = token.imprint.to_bytes();
        let value = serde_json::to_vec(token)
            .map_err(|e| ClientError::Storage(format!("Failed to serialize token: {}", e)))?;

        self.db
            .insert(key, value)
            .map_err(|e| ClientError::Storage(format!("Failed to store token: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| ClientError::Storage(format!("Failed to flush database: {}", e)))?;

        Ok(())
    }

    pub fn get(&self, imprint: &Imprint) -> Result<Option<TimestampToken>> {
        let value = self
            .db
            .get(imprint.to_bytes())
            .map_err(|e| ClientError::Storage(format!("Failed to retrieve token: {}", e)))?;

        value
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| {
                    ClientError::Storage(format!("Failed to deserialize token: {}", e))
                })
            })
            .transpose()
    }

    /// All stored tokens, ordered by imprint
    pub fn list(&self) -> Result<Vec<TimestampToken>> {
        self.db
            .iter()
            .values()
            .map(|item| {
                let value = item.map_err(|e| {
                    ClientError::Storage(format!("Failed to iterate database: {}", e))
                })?;
                serde_json::from_slice(&value).map_err(|e| {
                    ClientError::Storage(format!("Failed to deserialize token: {}", e))
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Export a token as pretty-printed JSON
    pub fn export_json(&self, imprint: &Imprint) -> Result<String> {
        let token = self
            .get(imprint)?
            .ok_or_else(|| ClientError::Storage(format!("No token found for {}", imprint)))?;

        serde_json::to_string_pretty(&token)
            .map_err(|e| ClientError::Storage(format!("Failed to serialize token: {}", e)))
    }

    /// Import a token from JSON, returning its imprint
    pub fn import_json(&self, json: &str) -> Result<Imprint> {
        let token: TimestampToken = serde_json::from_str(json)
            .map_err(|e| ClientError::Storage(format!("Failed to parse JSON: {}", e)))?;

        self.store(&token)?;
        Ok(token.imprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kts_types::{
        Digest, HashAlgorithm, MerklePath, Nonce, PublicKey, Signature, Timestamp,
    };

    fn token(data: &[u8]) -> TimestampToken {
        TimestampToken {
            imprint: HashAlgorithm::Sha256.hash(data),
            nonce: Nonce::new([2u8; 32]),
            aggregation_path: MerklePath {
                leaf_index: 0,
                siblings: vec![],
            },
            round_root: Digest::new([3u8; 32]),
            registration_time: Timestamp::new(1000, 0).unwrap(),
            signature: Signature::new([0u8; 64]),
            signing_key: PublicKey::new([0u8; 32]),
            calendar_chain: None,
        }
    }

    #[test]
    fn test_store_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = TokenStore::open(temp_dir.path()).unwrap();
        assert!(store.is_empty());

        let token = token(b"doc");
        store.store(&token).unwrap();

        let retrieved = store.get(&token.imprint).unwrap();
        assert_eq!(retrieved, Some(token));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = TokenStore::open(temp_dir.path()).unwrap();

        assert!(store.get(&HashAlgorithm::Sha256.hash(b"nope")).unwrap().is_none());
        assert!(store.export_json(&HashAlgorithm::Sha256.hash(b"nope")).is_err());
    }

    #[test]
    fn test_store_replaces_same_imprint() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = TokenStore::open(temp_dir.path()).unwrap();

        let original = token(b"doc");
        store.store(&original).unwrap();

        let mut updated = original.clone();
        updated.registration_time = Timestamp::new(2000, 0).unwrap();
        store.store(&updated).unwrap();

        assert_eq!(store.list().unwrap(), vec![updated]);
    }

    #[test]
    fn test_export_import() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let source = TokenStore::open(source_dir.path()).unwrap();
        let target = TokenStore::open(target_dir.path()).unwrap();

        let token = token(b"exported");
        source.store(&token).unwrap();

        let json = source.export_json(&token.imprint).unwrap();
        let imprint = target.import_json(&json).unwrap();

        assert_eq!(imprint, token.imprint);
        assert_eq!(target.get(&imprint).unwrap(), Some(token));
    }

    #[test]
    fn test_import_rejects_garbage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = TokenStore::open(temp_dir.path()).unwrap();
        assert!(matches!(
            store.import_json("{not json"),
            Err(ClientError::Storage(_))
        ));
    }

    #[test]
    fn test_token_file_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("doc.kts");

        let token = token(b"doc");
        save_token(&path, &token).unwrap();
        let loaded: TimestampToken = load_token(&path).unwrap();
        assert_eq!(loaded, token);
    }

    #[test]
    fn test_load_corrupt_token_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("doc.kts");
        std::fs::write(&path, b"\x00\x01garbage").unwrap();

        let result: Result<TimestampToken> = load_token(&path);
        assert!(matches!(result, Err(ClientError::Storage(_))));
    }
}
