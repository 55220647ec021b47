//! Explicit store pruning.
//!
//! Never run by a sync pass: entries of old commits are kept until the user
//! asks for them to go.

use crate::store::{
    remove_path, remove_temp_dirs, StoreError, StoreManager, HISTORY_DIR, TEMP_PREFIX,
};
use skills_core::{Config, RepoId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub removed: Vec<PathBuf>,
}

/// Remove store entries no repo's `resolved_sha` refers to, leftovers of
/// interrupted clones, and whole repo directories no longer configured.
pub async fn collect_garbage(
    store: &StoreManager,
    config: &Config,
) -> Result<GcReport, StoreError> {
    let mut report = GcReport::default();
    let keep: HashMap<String, (RepoId, Option<String>)> = config
        .repos
        .iter()
        .map(|r| {
            let id = RepoId::from_locator(&r.repo);
            let sha = r.resolved_sha.as_ref().map(|s| s.to_ascii_lowercase());
            (id.as_str().to_string(), (id, sha))
        })
        .collect();

    let entries = match std::fs::read_dir(store.root()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(io_error(store.root(), e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| io_error(store.root(), e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match keep.get(&name) {
            Some((id, sha)) => prune_repo(store, id, sha.as_deref(), &mut report).await?,
            None => {
                info!(path = %path.display(), "removing unconfigured repo");
                remove_path(&path).map_err(|e| io_error(&path, e))?;
                report.removed.push(path);
            }
        }
    }
    Ok(report)
}

async fn prune_repo(
    store: &StoreManager,
    id: &RepoId,
    keep_sha: Option<&str>,
    report: &mut GcReport,
) -> Result<(), StoreError> {
    let _guard = store.locks().acquire(id).await;
    let repo_dir = store.repo_dir(id);

    let temps = remove_temp_dirs(&repo_dir).map_err(|e| io_error(&repo_dir, e))?;
    report.removed.extend(temps);

    let history = store.existing_history(id);
    let entries = std::fs::read_dir(&repo_dir).map_err(|e| io_error(&repo_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error(&repo_dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == HISTORY_DIR || name.starts_with(TEMP_PREFIX) {
            continue;
        }
        if keep_sha.is_some_and(|sha| name.starts_with(sha)) {
            debug!(repo = %id, entry = %name, "keeping referenced entry");
            continue;
        }

        let path = entry.path();
        info!(path = %path.display(), "removing unreferenced entry");
        match history {
            Some(ref git_dir) => store
                .discard_entry(git_dir, &path)
                .await
                .map_err(|e| io_error(&path, e))?,
            None => remove_path(&path).map_err(|e| io_error(&path, e))?,
        }
        report.removed.push(path);
    }

    if let Some(git_dir) = history {
        store.git().worktree_prune(&git_dir).await?;
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
