//! Local cache of detached timestamp files, keyed by file digest

use sled::Db;
use ots_core::DetachedTimestampFile;

use crate::{ClientError, Result};

/// Storage for timestamp proofs
pub struct ProofStorage {
    db: Db,
}

impl ProofStorage {
    /// Open or create a proof storage at the given path
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| ClientError::Storage(format!("Failed to open database: {}", e)))?;

        Ok(Self { db })
    }

    /// Store a proof, replacing any earlier one for the same digest
    pub fn store(&self, file: &DetachedTimestampFile) -> Result<()> {
        let key = file.digest();
        let value = file.to_bytes()?;

        self.db
            .insert(key, value)
            .map_err(|e| ClientError::Storage(format!("Failed to store proof: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| ClientError::Storage(format!("Failed to flush database: {}", e)))?;

        Ok(())
    }

    /// Retrieve the proof for a file digest
    pub fn get(&self, digest: &[u8]) -> Result<Option<DetachedTimestampFile>> {
        let value = self
            .db
            .get(digest)
            .map_err(|e| ClientError::Storage(format!("Failed to retrieve proof: {}", e)))?;

        match value {
            Some(bytes) => Ok(Some(DetachedTimestampFile::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all stored proofs
    pub fn list(&self) -> Result<Vec<(Vec<u8>, DetachedTimestampFile)>> {
        let mut proofs = Vec::new();

        for item in self.db.iter() {
            let (key, value) = item
                .map_err(|e| ClientError::Storage(format!("Failed to iterate database: {}", e)))?;

            let file = DetachedTimestampFile::from_bytes(&value)?;
            proofs.push((key.to_vec(), file));
        }

        Ok(proofs)
    }

    /// Remove the proof for a digest, returning whether one was stored
    pub fn remove(&self, digest: &[u8]) -> Result<bool> {
        let removed = self
            .db
            .remove(digest)
            .map_err(|e| ClientError::Storage(format!("Failed to remove proof: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| ClientError::Storage(format!("Failed to flush database: {}", e)))?;

        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ots_types::{Attestation, Op};

    fn pending_file(byte: u8) -> DetachedTimestampFile {
        let file = DetachedTimestampFile::from_digest(Op::sha256(), vec![byte; 32]).unwrap();
        file.timestamp()
            .add_attestation(Attestation::pending("https://alice.btc.calendar.opentimestamps.org").unwrap());
        file
    }

    #[test]
    fn test_storage_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = ProofStorage::open(temp_dir.path()).unwrap();

        let file = pending_file(1);
        storage.store(&file).unwrap();

        let retrieved = storage.get(&file.digest()).unwrap();
        assert_eq!(retrieved, Some(file));
        assert!(storage.get(&[9u8; 32]).unwrap().is_none());
    }

    #[test]
    fn test_store_replaces() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = ProofStorage::open(temp_dir.path()).unwrap();

        let file = pending_file(2);
        storage.store(&file).unwrap();
        file.timestamp()
            .add_attestation(Attestation::Bitcoin { height: 10 });
        storage.store(&file).unwrap();

        let retrieved = storage.get(&file.digest()).unwrap().unwrap();
        assert!(retrieved.timestamp().is_complete());
        assert_eq!(storage.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_and_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = ProofStorage::open(temp_dir.path()).unwrap();

        for byte in 0..3 {
            storage.store(&pending_file(byte)).unwrap();
        }
        let listed = storage.list().unwrap();
        assert_eq!(listed.len(), 3);
        for (digest, file) in &listed {
            assert_eq!(digest, &file.digest());
        }

        assert!(storage.remove(&[1u8; 32]).unwrap());
        assert!(!storage.remove(&[1u8; 32]).unwrap());
        assert_eq!(storage.list().unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = pending_file(5);
        {
            let storage = ProofStorage::open(temp_dir.path()).unwrap();
            storage.store(&file).unwrap();
        }
        let storage = ProofStorage::open(temp_dir.path()).unwrap();
        assert_eq!(storage.get(&file.digest()).unwrap(), Some(file));
    }
}
