//! Repository registry for the server.
//!
//! Maps repository names to bare repositories under the data root, creating
//! a repository on first reference. The registry and each per-branch ref
//! lock are explicitly serialized; the object stores themselves need no
//! locking because content-addressed writes are idempotent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use vellum_core::repository::Repository;
use vellum_core::{Error, Result};

/// Per-branch ref-update locks, created on first access.
///
/// A lock is held only across the read-compare-write of a ref file, never
/// across network I/O.
#[derive(Default)]
pub struct BranchLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BranchLocks {
    pub async fn lock_for(&self, branch: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(branch.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// A repository as the server sees it: storage plus its ref locks.
pub struct ManagedRepository {
    pub repo: Repository,
    pub locks: BranchLocks,
}

/// Name → repository registry rooted at a data directory.
pub struct RepositoryManager {
    data_root: PathBuf,
    default_branch: String,
    repos: Mutex<HashMap<String, Arc<ManagedRepository>>>,
}

impl RepositoryManager {
    pub fn new(data_root: impl Into<PathBuf>, default_branch: impl Into<String>) -> Self {
        Self {
            data_root: data_root.into(),
            default_branch: default_branch.into(),
            repos: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Register every repository already present under the data root.
    pub async fn bootstrap(&self) -> Result<usize> {
        if !self.data_root.is_dir() {
            return Ok(0);
        }
        let mut found = 0;
        for entry in std::fs::read_dir(&self.data_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_name(&name).is_ok() && entry.path().join("HEAD").is_file() {
                self.get_or_create(&name).await?;
                found += 1;
            }
        }
        Ok(found)
    }

    /// Resolve a repository, creating and initializing it when absent.
    ///
    /// Idempotent: the registry mutex is held across the whole
    /// check-create-insert, so two sessions racing on a new name observe a
    /// single initialization.
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<ManagedRepository>> {
        validate_name(name)?;
        let mut repos = self.repos.lock().await;
        if let Some(managed) = repos.get(name) {
            return Ok(managed.clone());
        }
        let path = self.data_root.join(name);
        let repo = Repository::init(&path, &self.default_branch)?;
        let managed = Arc::new(ManagedRepository {
            repo,
            locks: BranchLocks::default(),
        });
        repos.insert(name.to_string(), managed.clone());
        tracing::info!(repo = name, path = %path.display(), "registered repository");
        Ok(managed)
    }

    /// Look up an already-registered repository.
    pub async fn get(&self, name: &str) -> Option<Arc<ManagedRepository>> {
        self.repos.lock().await.get(name).cloned()
    }

    /// Names of all registered repositories, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repos.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Repository names become directory names; keep them boring.
pub fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::ProtocolViolation(format!(
            "invalid repository name {name:?}"
        )))
    }
}
