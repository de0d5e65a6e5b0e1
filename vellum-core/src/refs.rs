//! Mutable named pointers into the commit graph.
//!
//! A branch is a file under `refs/heads/` holding one commit hash; `HEAD`
//! holds either `ref: refs/heads/<branch>` (symbolic) or a raw hash
//! (detached). Every write is a temp-file-then-rename replace, so a ref is
//! never partially visible.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::object::ObjectId;

const HEAD_FILE: &str = "HEAD";
const HEADS_DIR: &str = "refs/heads";

/// Where `HEAD` currently points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    Branch(String),
    Detached(ObjectId),
}

/// Reference store rooted at a repository meta directory.
#[derive(Debug, Clone)]
pub struct RefStore {
    root: PathBuf,
}

impl RefStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn branch_path(&self, branch: &str) -> PathBuf {
        self.root.join(HEADS_DIR).join(branch)
    }

    /// Read a branch tip, failing when the branch does not exist.
    pub fn read(&self, branch: &str) -> Result<ObjectId> {
        self.tip(branch)?
            .ok_or_else(|| Error::UnknownBranch(branch.to_string()))
    }

    /// Read a branch tip; None for an unborn branch.
    pub fn tip(&self, branch: &str) -> Result<Option<ObjectId>> {
        let path = self.branch_path(branch);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        ObjectId::from_hex(trimmed)
            .map(Some)
            .map_err(|_| Error::CorruptObject(format!("ref {branch} holds {trimmed:?}")))
    }

    /// Atomically replace a branch tip.
    pub fn write(&self, branch: &str, id: ObjectId) -> Result<()> {
        self.write_file(&self.branch_path(branch), &format!("{id}\n"))?;
        tracing::debug!(branch, tip = %id, "updated ref");
        Ok(())
    }

    /// Resolve `HEAD`.
    pub fn head(&self) -> Result<Head> {
        let text = fs::read_to_string(self.root.join(HEAD_FILE))?;
        let trimmed = text.trim();
        match trimmed.strip_prefix("ref: ") {
            Some(target) => {
                let branch = target.rsplit('/').next().unwrap_or(target);
                Ok(Head::Branch(branch.to_string()))
            }
            None => {
                let id = ObjectId::from_hex(trimmed).map_err(|_| {
                    Error::CorruptObject(format!("HEAD holds {trimmed:?}"))
                })?;
                Ok(Head::Detached(id))
            }
        }
    }

    /// The checked-out branch name; an error when HEAD is detached.
    pub fn current_branch(&self) -> Result<String> {
        match self.head()? {
            Head::Branch(branch) => Ok(branch),
            Head::Detached(_) => Err(Error::DetachedHead),
        }
    }

    /// Point `HEAD` at a named branch.
    pub fn set_head(&self, branch: &str) -> Result<()> {
        self.write_file(
            &self.root.join(HEAD_FILE),
            &format!("ref: refs/heads/{branch}\n"),
        )
    }

    /// Point `HEAD` at a raw commit.
    pub fn set_head_detached(&self, id: ObjectId) -> Result<()> {
        self.write_file(&self.root.join(HEAD_FILE), &format!("{id}\n"))
    }

    /// List the born branches, sorted.
    pub fn branches(&self) -> Result<Vec<String>> {
        let heads = self.root.join(HEADS_DIR);
        let mut names = Vec::new();
        if heads.is_dir() {
            for entry in fs::read_dir(heads)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::Io(std::io::Error::other("ref path has no parent")))?;
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn refs() -> (TempDir, RefStore) {
        let dir = TempDir::new().unwrap();
        let refs = RefStore::new(dir.path());
        (dir, refs)
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (_dir, refs) = refs();
        let id = ObjectId::new([1u8; 20]);
        refs.write("master", id).unwrap();
        assert_eq!(refs.read("master").unwrap(), id);
        assert_eq!(refs.tip("master").unwrap(), Some(id));
    }

    #[test]
    fn test_unborn_branch() {
        let (_dir, refs) = refs();
        assert_eq!(refs.tip("master").unwrap(), None);
        assert!(matches!(
            refs.read("master"),
            Err(Error::UnknownBranch(b)) if b == "master"
        ));
    }

    #[test]
    fn test_write_replaces() {
        let (_dir, refs) = refs();
        refs.write("master", ObjectId::new([1u8; 20])).unwrap();
        let newer = ObjectId::new([2u8; 20]);
        refs.write("master", newer).unwrap();
        assert_eq!(refs.read("master").unwrap(), newer);
    }

    #[test]
    fn test_symbolic_head() {
        let (_dir, refs) = refs();
        refs.set_head("develop").unwrap();
        assert_eq!(refs.head().unwrap(), Head::Branch("develop".to_string()));
        assert_eq!(refs.current_branch().unwrap(), "develop");
    }

    #[test]
    fn test_detached_head() {
        let (_dir, refs) = refs();
        let id = ObjectId::new([4u8; 20]);
        refs.set_head_detached(id).unwrap();
        assert_eq!(refs.head().unwrap(), Head::Detached(id));
        assert!(matches!(refs.current_branch(), Err(Error::DetachedHead)));
    }

    #[test]
    fn test_branches_sorted() {
        let (_dir, refs) = refs();
        refs.write("topic", ObjectId::new([1u8; 20])).unwrap();
        refs.write("master", ObjectId::new([2u8; 20])).unwrap();
        assert_eq!(refs.branches().unwrap(), vec!["master", "topic"]);
    }
}
