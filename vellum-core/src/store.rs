//! Content-addressed loose-object storage.
//!
//! Objects live under `objects/<hh>/<38-hex>` as zlib-compressed serialized
//! buffers. Identical content hashes to the identical path, so concurrent
//! writers are safe by construction; each write lands in a temp file that is
//! renamed into place so readers never observe a truncated object.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::object::{self, ObjectId, ObjectKind};

/// On-disk object store rooted at an `objects/` directory.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Create a handle over an `objects/` directory (created lazily on write).
    pub fn new(objects_root: impl Into<PathBuf>) -> Self {
        Self {
            root: objects_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// Encode, hash and store a payload; a no-op when the object exists.
    pub fn put(&self, kind: ObjectKind, payload: &[u8]) -> Result<ObjectId> {
        let encoded = object::encode(kind, payload);
        let id = ObjectId::from_encoded(&encoded);
        if self.exists(id) {
            return Ok(id);
        }
        let compressed = object::compress(&encoded)?;
        self.write_atomic(id, &compressed)?;
        tracing::trace!(object = %id, kind = %kind, "stored object");
        Ok(id)
    }

    /// Store an already-compressed object received off the wire.
    ///
    /// The buffer is decompressed to recover the serialized form, which is
    /// validated and hashed; the returned id is derived from the content, not
    /// from anything the sender claimed.
    pub fn put_raw(&self, compressed: &[u8]) -> Result<ObjectId> {
        let encoded = object::decompress(compressed)?;
        object::decode(&encoded)?;
        let id = ObjectId::from_encoded(&encoded);
        if !self.exists(id) {
            self.write_atomic(id, compressed)?;
        }
        Ok(id)
    }

    /// Load and decode an object.
    pub fn get(&self, id: ObjectId) -> Result<(ObjectKind, Vec<u8>)> {
        let raw = self.get_raw(id)?;
        let encoded = object::decompress(&raw)?;
        object::decode(&encoded)
    }

    /// The compressed on-disk bytes, exactly as transferred over the wire.
    pub fn get_raw(&self, id: ObjectId) -> Result<Vec<u8>> {
        let path = self.object_path(id);
        if !path.is_file() {
            return Err(Error::ObjectNotFound(id));
        }
        Ok(fs::read(path)?)
    }

    /// Existence check without decompression.
    pub fn exists(&self, id: ObjectId) -> bool {
        self.object_path(id).is_file()
    }

    /// Walk the fan-out directories and collect every stored id, sorted.
    pub fn list(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        if !self.root.is_dir() {
            return Ok(ids);
        }
        for fanout in fs::read_dir(&self.root)? {
            let fanout = fanout?;
            if !fanout.file_type()?.is_dir() {
                continue;
            }
            let prefix = fanout.file_name();
            for entry in fs::read_dir(fanout.path())? {
                let entry = entry?;
                let hex = format!(
                    "{}{}",
                    prefix.to_string_lossy(),
                    entry.file_name().to_string_lossy()
                );
                if let Ok(id) = ObjectId::from_hex(&hex) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn write_atomic(&self, id: ObjectId, bytes: &[u8]) -> Result<()> {
        let hex = id.to_hex();
        let dir = self.root.join(&hex[..2]);
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(dir.join(&hex[2..]))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path().join("objects"));
        (dir, store)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        let id = store.put(ObjectKind::Blob, b"hello").unwrap();
        let (kind, payload) = store.get(id).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_put_is_deduplicated() {
        let (_dir, store) = store();
        let a = store.put(ObjectKind::Blob, b"same bytes").unwrap();
        let b = store.put(ObjectKind::Blob, b"same bytes").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list().unwrap(), vec![a]);
    }

    #[test]
    fn test_get_missing_object() {
        let (_dir, store) = store();
        let id = ObjectId::new([7u8; 20]);
        assert!(!store.exists(id));
        assert!(matches!(store.get(id), Err(Error::ObjectNotFound(_))));
    }

    #[test]
    fn test_put_raw_matches_put() {
        let (_dir, src) = store();
        let id = src.put(ObjectKind::Blob, b"wire me").unwrap();
        let raw = src.get_raw(id).unwrap();

        let (_other_dir, other) = store();
        let stored = other.put_raw(&raw).unwrap();
        assert_eq!(stored, id);
        assert_eq!(other.get(id).unwrap().1, b"wire me");
    }

    #[test]
    fn test_put_raw_rejects_garbage() {
        let (_dir, store) = store();
        assert!(matches!(
            store.put_raw(b"not compressed"),
            Err(Error::CorruptObject(_))
        ));
    }

    #[test]
    fn test_list_walks_fanout() {
        let (_dir, store) = store();
        let mut expect = vec![
            store.put(ObjectKind::Blob, b"one").unwrap(),
            store.put(ObjectKind::Blob, b"two").unwrap(),
            store.put(ObjectKind::Commit, b"timestamp: 1\nmessage:   x\n\n").unwrap(),
        ];
        expect.sort();
        assert_eq!(store.list().unwrap(), expect);
    }
}
