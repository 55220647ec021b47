//! Content-addressed checkout store.
//!
//! Layout under the store root:
//!
//! ```text
//! <repo_id>/.history          bare clone shared by every checkout of the repo
//! <repo_id>/<sha>/            detached worktree of <sha>
//! <repo_id>/.tmp-history-*    clone in progress; never trusted
//! ```
//!
//! An entry is only handed out after it passes [`StoreManager::is_complete`];
//! anything else found at an entry path is discarded and recreated.

use crate::git::{Git, GitError};
use crate::locks::RepoLocks;
use crate::resolver::{is_full_commit_id, unreachable_error};
use skills_core::{EntityError, RepoId};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const HISTORY_DIR: &str = ".history";
pub const TEMP_PREFIX: &str = ".tmp-";

/// Errors from whole-store maintenance (`gc`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Git(#[from] GitError),
}

/// A verified checkout of one repo at one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub repo_id: RepoId,
    pub sha: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StoreManager {
    root: PathBuf,
    git: Git,
    locks: RepoLocks,
}

impl StoreManager {
    pub fn new(root: impl Into<PathBuf>, git: Git, locks: RepoLocks) -> Self {
        Self {
            root: root.into(),
            git,
            locks,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn git(&self) -> &Git {
        &self.git
    }

    pub(crate) fn locks(&self) -> &RepoLocks {
        &self.locks
    }

    pub fn repo_dir(&self, id: &RepoId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn history_dir(&self, id: &RepoId) -> PathBuf {
        self.repo_dir(id).join(HISTORY_DIR)
    }

    /// The repo's history store, if a finished clone exists.
    pub fn existing_history(&self, id: &RepoId) -> Option<PathBuf> {
        let dir = self.history_dir(id);
        dir.join("HEAD").is_file().then_some(dir)
    }

    /// Guarantee a complete checkout of `sha` exists and return it.
    ///
    /// `sha` may be abbreviated; the returned entry always carries the full
    /// id. `repo` is the locator as configured, `source` what git is given.
    pub async fn ensure_checkout(
        &self,
        repo: &str,
        source: &str,
        id: &RepoId,
        sha: &str,
    ) -> Result<StoreEntry, EntityError> {
        let _guard = self.locks.acquire(id).await;

        let repo_dir = self.repo_dir(id);
        std::fs::create_dir_all(&repo_dir).map_err(|e| store_failed(repo, &repo_dir, e))?;

        let (history, cloned) = self.ensure_history(repo, source, id).await?;
        let sha = self.ensure_commit(repo, &history, sha, cloned).await?;

        let path = repo_dir.join(&sha);
        if path.exists() {
            if self.is_complete(&path, &sha).await {
                debug!(repo = %repo, sha = %sha, "store entry up to date");
                return Ok(StoreEntry {
                    repo_id: id.clone(),
                    sha,
                    root: path,
                });
            }
            warn!(repo = %repo, path = %path.display(), "discarding incomplete store entry");
            self.discard_entry(&history, &path)
                .await
                .map_err(|e| store_failed(repo, &path, e))?;
        }

        // A registration left by an interrupted add blocks re-adding the path.
        self.git
            .worktree_prune(&history)
            .await
            .map_err(|e| store_failed(repo, &history, e))?;
        self.git
            .worktree_add(&history, &path, &sha)
            .await
            .map_err(|e| store_failed(repo, &path, e))?;

        if !self.is_complete(&path, &sha).await {
            return Err(EntityError::StoreFailed {
                repo: repo.to_string(),
                path,
                reason: "checkout incomplete after materialization".to_string(),
            });
        }
        info!(repo = %repo, sha = %sha, path = %path.display(), "materialized store entry");
        Ok(StoreEntry {
            repo_id: id.clone(),
            sha,
            root: path,
        })
    }

    /// Return the history store, cloning it first if needed. The flag is
    /// true when the clone happened in this call.
    async fn ensure_history(
        &self,
        repo: &str,
        source: &str,
        id: &RepoId,
    ) -> Result<(PathBuf, bool), EntityError> {
        if let Some(history) = self.existing_history(id) {
            return Ok((history, false));
        }

        let repo_dir = self.repo_dir(id);
        remove_temp_dirs(&repo_dir).map_err(|e| store_failed(repo, &repo_dir, e))?;

        let history = self.history_dir(id);
        if history.exists() {
            warn!(repo = %repo, path = %history.display(), "removing unusable history store");
            remove_path(&history).map_err(|e| store_failed(repo, &history, e))?;
        }

        let tmp = repo_dir.join(format!("{TEMP_PREFIX}history-{}", uuid::Uuid::now_v7()));
        info!(repo = %repo, "cloning history store");
        if let Err(e) = self.git.clone_bare(source, &tmp).await {
            let _ = std::fs::remove_dir_all(&tmp);
            return Err(unreachable_error(repo, e));
        }
        std::fs::rename(&tmp, &history).map_err(|e| store_failed(repo, &history, e))?;
        Ok((history, true))
    }

    /// Make sure `sha` is present in the history store, fetching if needed,
    /// and return its full id.
    async fn ensure_commit(
        &self,
        repo: &str,
        history: &Path,
        sha: &str,
        cloned: bool,
    ) -> Result<String, EntityError> {
        if let Some(full) = self.lookup(repo, history, sha).await? {
            return Ok(full);
        }

        if !cloned {
            info!(repo = %repo, sha = %sha, "fetching missing commit");
            self.git
                .fetch_all(history)
                .await
                .map_err(|e| unreachable_error(repo, e))?;
            if let Some(full) = self.lookup(repo, history, sha).await? {
                return Ok(full);
            }
        }

        if is_full_commit_id(sha) {
            if let Err(e) = self.git.fetch_commit(history, sha).await {
                debug!(repo = %repo, sha = %sha, error = %e, "direct commit fetch failed");
            }
            if let Some(full) = self.lookup(repo, history, sha).await? {
                return Ok(full);
            }
        }

        Err(EntityError::CommitNotFound {
            repo: repo.to_string(),
            sha: sha.to_string(),
        })
    }

    /// Full id of `sha` if the history store has it.
    async fn lookup(
        &self,
        repo: &str,
        history: &Path,
        sha: &str,
    ) -> Result<Option<String>, EntityError> {
        if is_full_commit_id(sha) {
            let found = self
                .git
                .has_commit(history, sha)
                .await
                .map_err(|e| store_failed(repo, history, e))?;
            return Ok(found.then(|| sha.to_ascii_lowercase()));
        }
        self.git
            .expand_commit(history, sha)
            .await
            .map_err(|e| store_failed(repo, history, e))
    }

    /// Whether the worktree at `path` is a faithful checkout of `sha`.
    pub async fn is_complete(&self, path: &Path, sha: &str) -> bool {
        match self.git.head(path).await {
            Ok(head) if head.eq_ignore_ascii_case(sha) => {}
            _ => return false,
        }
        matches!(self.git.is_clean(path).await, Ok(true))
    }

    /// Remove a worktree and its registration.
    pub(crate) async fn discard_entry(&self, history: &Path, path: &Path) -> std::io::Result<()> {
        if let Err(e) = self.git.worktree_remove(history, path).await {
            debug!(path = %path.display(), error = %e, "worktree remove failed");
        }
        if path.symlink_metadata().is_ok() {
            remove_path(path)?;
        }
        if let Err(e) = self.git.worktree_prune(history).await {
            debug!(path = %history.display(), error = %e, "worktree prune failed");
        }
        Ok(())
    }
}

/// Delete leftover `.tmp-` directories of interrupted clones.
pub(crate) fn remove_temp_dirs(repo_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let entries = match std::fs::read_dir(repo_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            let path = entry.path();
            remove_path(&path)?;
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Remove a file, symlink or directory tree.
pub(crate) fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = path.symlink_metadata()?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn store_failed(repo: &str, path: &Path, err: impl std::fmt::Display) -> EntityError {
    EntityError::StoreFailed {
        repo: repo.to_string(),
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
