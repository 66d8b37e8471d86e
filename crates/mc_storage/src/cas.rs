//! Content-addressed blob store for model artifacts.
//!
//! A blob lives at `<data_dir>/objects/sha256/<first two hex chars>/<digest>`.
//! Writing the same bytes twice is a no-op; every read re-hashes the file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CasError {
    #[error("blob I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob {expected} is corrupt (content digest {found})")]
    Corrupt { expected: String, found: String },
    #[error("no blob with digest {0}")]
    Missing(String),
    #[error("malformed digest '{0}'")]
    BadDigest(String),
}

pub type Result<T> = std::result::Result<T, CasError>;

pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub struct CasStore {
    root: PathBuf,
}

impl CasStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let root = data_dir.join("objects").join("sha256");
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn blob_path(&self, hash: &str) -> Result<PathBuf> {
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CasError::BadDigest(hash.to_string()));
        }
        Ok(self.root.join(&hash[..2]).join(hash))
    }

    /// Store an artifact and return its digest.
    pub fn put_bytes(&self, bytes: &[u8]) -> Result<String> {
        let hash = digest(bytes);
        let target = self.blob_path(&hash)?;
        if target.is_file() {
            tracing::debug!(%hash, "blob already stored");
            return Ok(hash);
        }

        let dir = self.root.join(&hash[..2]);
        fs::create_dir_all(&dir)?;
        let staging = dir.join(format!(".{hash}.partial"));
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &target)?;

        tracing::debug!(%hash, bytes = bytes.len(), "blob stored");
        Ok(hash)
    }

    pub fn get_bytes(&self, hash: &str) -> Result<Vec<u8>> {
        let bytes = match fs::read(self.blob_path(hash)?) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CasError::Missing(hash.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let found = digest(&bytes);
        if found != hash {
            return Err(CasError::Corrupt {
                expected: hash.to_string(),
                found,
            });
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, CasStore) {
        let dir = TempDir::new().unwrap();
        let cas = CasStore::open(dir.path()).unwrap();
        (dir, cas)
    }

    #[test]
    fn identical_artifacts_share_a_blob() {
        let (_dir, cas) = store();
        let a = cas.put_bytes(br#"{"weights":[1.0]}"#).unwrap();
        let b = cas.put_bytes(br#"{"weights":[1.0]}"#).unwrap();
        assert_eq!(a, b);
        assert!(cas.blob_path(&a).unwrap().is_file());
        assert_eq!(cas.get_bytes(&a).unwrap(), br#"{"weights":[1.0]}"#);
    }

    #[test]
    fn empty_artifact_digest() {
        let (_dir, cas) = store();
        let hash = cas.put_bytes(&[]).unwrap();
        assert_eq!(hash, digest(b""));
        assert!(hash.starts_with("e3b0c442"));
        assert!(cas.get_bytes(&hash).unwrap().is_empty());
    }

    #[test]
    fn unknown_and_malformed_digests() {
        let (_dir, cas) = store();
        let absent = digest(b"never stored");
        assert!(matches!(cas.get_bytes(&absent), Err(CasError::Missing(_))));
        assert!(matches!(cas.get_bytes("../x"), Err(CasError::BadDigest(_))));
    }

    #[test]
    fn tampered_blob_is_reported() {
        let (_dir, cas) = store();
        let hash = cas.put_bytes(b"model bytes").unwrap();
        fs::write(cas.blob_path(&hash).unwrap(), b"tampered").unwrap();
        assert!(matches!(cas.get_bytes(&hash), Err(CasError::Corrupt { .. })));
    }
}
