//! Repository aggregate: one object store, one reference store, one HEAD,
//! and (for working copies) the staging manifest and pending-fetch list.
//!
//! Layout of the meta directory:
//!
//! ```text
//! {meta}/
//!   objects/{hash[0..2]}/{hash[2..]}   content-addressed object store
//!   refs/heads/{branch}                40-hex commit hash + newline
//!   HEAD                               "ref: refs/heads/{branch}" or raw hash
//!   index                              staging manifest (working copies)
//!   FETCH_HEAD                         pending-fetch list (working copies)
//!   config                             remotes, owned by the CLI front end
//! ```
//!
//! Server-side repositories are bare: the meta directory is the repository
//! root. A working copy keeps its meta directory at `<workdir>/.vellum`.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;

use crate::commit::{self, Commit, ManifestEntry};
use crate::error::{Error, Result};
use crate::object::{ObjectId, ObjectKind};
use crate::refs::{Head, RefStore};
use crate::store::ObjectStore;

/// Meta directory name inside a working copy
pub const META_DIR: &str = ".vellum";
/// Branch used when none is configured
pub const DEFAULT_BRANCH: &str = "master";

const INDEX_FILE: &str = "index";
const PENDING_FILE: &str = "FETCH_HEAD";
const CONFIG_FILE: &str = "config";

#[derive(Debug)]
pub struct Repository {
    meta: PathBuf,
    work_tree: Option<PathBuf>,
    store: ObjectStore,
    refs: RefStore,
}

impl Repository {
    /// Open or create a bare repository at `meta`.
    ///
    /// Idempotent: existing objects, refs and HEAD are left untouched.
    pub fn init(meta: &Path, default_branch: &str) -> Result<Repository> {
        fs::create_dir_all(meta.join("objects"))?;
        fs::create_dir_all(meta.join("refs/heads"))?;
        let refs = RefStore::new(meta);
        if !meta.join("HEAD").is_file() {
            refs.set_head(default_branch)?;
            tracing::debug!(path = %meta.display(), default_branch, "initialized repository");
        }
        Self::open(meta)
    }

    /// Open an existing bare repository.
    pub fn open(meta: &Path) -> Result<Repository> {
        if !meta.join("objects").is_dir() || !meta.join("HEAD").is_file() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no repository at {}", meta.display()),
            )));
        }
        Ok(Repository {
            meta: meta.to_path_buf(),
            work_tree: None,
            store: ObjectStore::new(meta.join("objects")),
            refs: RefStore::new(meta),
        })
    }

    /// Initialize a working copy rooted at `workdir`.
    pub fn init_work_tree(workdir: &Path, default_branch: &str) -> Result<Repository> {
        let mut repo = Self::init(&workdir.join(META_DIR), default_branch)?;
        repo.work_tree = Some(workdir.to_path_buf());
        Ok(repo)
    }

    /// Open the working copy rooted at `workdir`.
    pub fn open_work_tree(workdir: &Path) -> Result<Repository> {
        let mut repo = Self::open(&workdir.join(META_DIR))?;
        repo.work_tree = Some(workdir.to_path_buf());
        Ok(repo)
    }

    /// Walk up from `start` until a directory containing `.vellum` is found.
    pub fn discover(start: &Path) -> Result<Repository> {
        let mut dir = Some(start);
        while let Some(candidate) = dir {
            if candidate.join(META_DIR).join("HEAD").is_file() {
                return Self::open_work_tree(candidate);
            }
            dir = candidate.parent();
        }
        Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "no {META_DIR} repository found in {} or any parent directory",
                start.display()
            ),
        )))
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta
    }

    pub fn work_tree(&self) -> Option<&Path> {
        self.work_tree.as_deref()
    }

    /// Remotes config path; the file's text format is owned by the CLI.
    pub fn config_path(&self) -> PathBuf {
        self.meta.join(CONFIG_FILE)
    }

    fn require_work_tree(&self) -> Result<&Path> {
        self.work_tree.as_deref().ok_or_else(|| {
            Error::Io(io::Error::other("repository has no work tree"))
        })
    }

    /* ---------------------- staging manifest ---------------------- */

    /// Store a working-tree file as a blob and record it in the staging
    /// manifest. Re-adding a path replaces its prior entry.
    pub fn stage(&self, path: &Path) -> Result<ObjectId> {
        let work = self.require_work_tree()?;
        let rel = if path.is_absolute() {
            path.strip_prefix(work)
                .map_err(|_| {
                    Error::Io(io::Error::other(format!(
                        "{} is outside the work tree",
                        path.display()
                    )))
                })?
                .to_path_buf()
        } else {
            path.to_path_buf()
        };
        let data = fs::read(work.join(&rel))?;
        let id = self.store.put(ObjectKind::Blob, &data)?;

        let rel_str = rel.to_string_lossy().replace('\\', "/");
        let mut entries = self.staged()?;
        entries.retain(|e| e.path != rel_str);
        entries.push(ManifestEntry { id, path: rel_str });
        self.write_index(&entries)?;
        Ok(id)
    }

    /// The staging manifest, in insertion order.
    pub fn staged(&self) -> Result<Vec<ManifestEntry>> {
        let path = self.meta.join(INDEX_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for line in fs::read_to_string(path)?.lines() {
            if line.is_empty() {
                continue;
            }
            let (hash, rel) = line.split_once(' ').ok_or_else(|| {
                Error::CorruptObject(format!("bad staging manifest line {line:?}"))
            })?;
            let id = ObjectId::from_hex(hash).map_err(|_| {
                Error::CorruptObject(format!("bad staging manifest hash {hash:?}"))
            })?;
            entries.push(ManifestEntry {
                id,
                path: rel.to_string(),
            });
        }
        Ok(entries)
    }

    pub fn clear_stage(&self) -> Result<()> {
        self.write_index(&[])
    }

    fn write_index(&self, entries: &[ManifestEntry]) -> Result<()> {
        let mut text = String::new();
        for entry in entries {
            text.push_str(&format!("{} {}\n", entry.id, entry.path));
        }
        fs::write(self.meta.join(INDEX_FILE), text)?;
        Ok(())
    }

    /* --------------------------- commits --------------------------- */

    /// Snapshot the staging manifest into a new commit, advance the current
    /// branch (or detached HEAD), and clear the stage.
    pub fn commit(&self, message: &str) -> Result<ObjectId> {
        let staged = self.staged()?;
        let head = self.refs.head()?;
        let parent = match &head {
            Head::Branch(branch) => self.refs.tip(branch)?,
            Head::Detached(id) => Some(*id),
        };
        let message = message.replace('\n', " ").trim().to_string();
        let commit = Commit::new(Utc::now().timestamp(), message, staged, parent);
        let id = self.store.put(ObjectKind::Commit, &commit.encode_body())?;
        match head {
            Head::Branch(branch) => {
                self.refs.write(&branch, id)?;
                tracing::info!(branch, commit = %id, "created commit");
            }
            Head::Detached(_) => {
                self.refs.set_head_detached(id)?;
                tracing::info!(commit = %id, "created commit on detached HEAD");
            }
        }
        self.clear_stage()?;
        Ok(id)
    }

    /// Tip of the currently checked-out branch, if born.
    pub fn current_tip(&self) -> Result<Option<ObjectId>> {
        match self.refs.head()? {
            Head::Branch(branch) => self.refs.tip(&branch),
            Head::Detached(id) => Ok(Some(id)),
        }
    }

    /// Ancestry of the current tip, newest first, for `log`-style output.
    pub fn log(&self) -> Result<Vec<(ObjectId, Commit)>> {
        let Some(tip) = self.current_tip()? else {
            return Ok(Vec::new());
        };
        let walk = commit::ancestors_until(&self.store, tip, None)?;
        let mut out = Vec::with_capacity(walk.commits.len());
        for id in walk.commits.into_iter().rev() {
            out.push((id, commit::load(&self.store, id)?));
        }
        Ok(out)
    }

    /* ----------------------- pending fetches ----------------------- */

    /// Commit hashes fetched but not yet merged, in append order.
    pub fn pending(&self) -> Result<Vec<ObjectId>> {
        let path = self.meta.join(PENDING_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for line in fs::read_to_string(path)?.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let id = ObjectId::from_hex(line).map_err(|_| {
                Error::CorruptObject(format!("bad pending-fetch entry {line:?}"))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Append hashes to the pending-fetch list, deduplicated.
    pub fn pending_add(&self, ids: &[ObjectId]) -> Result<()> {
        let mut list = self.pending()?;
        for id in ids {
            if !list.contains(id) {
                list.push(*id);
            }
        }
        let mut text = String::new();
        for id in &list {
            text.push_str(&format!("{id}\n"));
        }
        fs::write(self.meta.join(PENDING_FILE), text)?;
        Ok(())
    }

    pub fn clear_pending(&self) -> Result<()> {
        let path = self.meta.join(PENDING_FILE);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /* ------------------------- working tree ------------------------ */

    /// Overwrite the working tree to match a commit's manifest, creating
    /// parent directories as needed.
    pub fn checkout_manifest(&self, commit: &Commit) -> Result<()> {
        let work = self.require_work_tree()?.to_path_buf();
        for entry in &commit.manifest {
            let rel = sanitize_manifest_path(&entry.path)?;
            let (kind, payload) = self.store.get(entry.id)?;
            if kind != ObjectKind::Blob {
                return Err(Error::CorruptObject(format!(
                    "manifest entry {} for {:?} is a {kind}, not a blob",
                    entry.id, entry.path
                )));
            }
            let dest = work.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, payload)?;
        }
        Ok(())
    }
}

/// Manifest paths come off the wire; refuse anything that could escape the
/// work tree.
fn sanitize_manifest_path(path: &str) -> Result<PathBuf> {
    let rel = PathBuf::from(path);
    let escapes = rel.components().any(|c| {
        !matches!(c, Component::Normal(_) | Component::CurDir)
    });
    if path.is_empty() || escapes {
        return Err(Error::CorruptObject(format!(
            "manifest path {path:?} escapes the work tree"
        )));
    }
    Ok(rel)
}
