//! Symlink reconciliation for one managed directory.
//!
//! Work is split into [`Reconciler::plan`], which only reads the directory
//! and diffs it against the desired mapping, and [`Reconciler::apply`],
//! which performs the planned operations. An up-to-date directory plans to
//! nothing, so a second run performs no filesystem writes.

use crate::store::remove_path;
use skills_core::{EntityError, LinkAction, LinkChange, LinkFailure};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A directory whose symlinks the tool reconciles.
#[derive(Debug, Clone, Default)]
pub struct ManagedDir {
    pub path: PathBuf,
    /// Every symlink inside belongs to the tool. Otherwise only symlinks
    /// pointing into the store do.
    pub exclusive: bool,
    /// Link name to absolute target.
    pub desired: BTreeMap<String, PathBuf>,
    /// Names left exactly as they are this pass.
    pub preserve: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    Create { path: PathBuf, target: PathBuf },
    Repoint { path: PathBuf, target: PathBuf },
    Remove { path: PathBuf },
    /// Remove a foreign entry (override requested), then create.
    Replace { path: PathBuf, target: PathBuf },
}

impl LinkOp {
    pub fn path(&self) -> &Path {
        match self {
            Self::Create { path, .. }
            | Self::Repoint { path, .. }
            | Self::Remove { path }
            | Self::Replace { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPlan {
    pub dir: PathBuf,
    pub ops: Vec<LinkOp>,
    /// Entries that could not be planned (collisions, unreadable entries).
    pub failures: Vec<LinkFailure>,
}

impl LinkPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    pub changes: Vec<LinkChange>,
    pub failures: Vec<LinkFailure>,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    store_roots: Vec<PathBuf>,
    force: bool,
}

impl Reconciler {
    pub fn new(store_root: &Path, force: bool) -> Self {
        let mut store_roots = vec![store_root.to_path_buf()];
        if let Ok(canonical) = store_root.canonicalize() {
            if canonical != store_root {
                store_roots.push(canonical);
            }
        }
        Self { store_roots, force }
    }

    /// Plan then apply.
    pub fn reconcile(&self, dir: &ManagedDir) -> LinkOutcome {
        let plan = self.plan(dir);
        self.apply(plan)
    }

    /// Diff the directory against its desired state without writing.
    pub fn plan(&self, dir: &ManagedDir) -> LinkPlan {
        let mut plan = LinkPlan {
            dir: dir.path.clone(),
            ..Default::default()
        };

        let entries = match std::fs::read_dir(&dir.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                plan.ops = dir
                    .desired
                    .iter()
                    .map(|(name, target)| LinkOp::Create {
                        path: dir.path.join(name),
                        target: target.clone(),
                    })
                    .collect();
                return plan;
            }
            Err(e) => {
                plan.failures.push(link_failed(&dir.path, &e));
                return plan;
            }
        };

        let mut removes = Vec::new();
        let mut writes = Vec::new();
        let mut seen = BTreeSet::new();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    plan.failures.push(link_failed(&dir.path, &e));
                    continue;
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let path = entry.path();
            let desired = dir.desired.get(&name);
            if desired.is_some() {
                seen.insert(name.clone());
            }

            let is_symlink = entry.file_type().map(|t| t.is_symlink()).unwrap_or(false);
            let current = if is_symlink {
                match std::fs::read_link(&path) {
                    Ok(target) => Some(target),
                    Err(e) => {
                        plan.failures.push(link_failed(&path, &e));
                        continue;
                    }
                }
            } else {
                None
            };
            let managed = current
                .as_deref()
                .is_some_and(|target| dir.exclusive || self.points_into_store(&dir.path, target));

            match (desired, current) {
                (Some(target), Some(current)) if managed => {
                    if current == *target {
                        debug!(path = %path.display(), "link up to date");
                    } else {
                        writes.push(LinkOp::Repoint {
                            path,
                            target: target.clone(),
                        });
                    }
                }
                (Some(target), _) => {
                    if self.force {
                        writes.push(LinkOp::Replace {
                            path,
                            target: target.clone(),
                        });
                    } else {
                        plan.failures.push(LinkFailure {
                            path: path.clone(),
                            error: EntityError::LinkCollision { path },
                        });
                    }
                }
                (None, _) if managed && !dir.preserve.contains(&name) => {
                    removes.push(LinkOp::Remove { path });
                }
                (None, _) => {}
            }
        }

        for (name, target) in &dir.desired {
            if !seen.contains(name) {
                writes.push(LinkOp::Create {
                    path: dir.path.join(name),
                    target: target.clone(),
                });
            }
        }

        removes.sort_by(|a, b| a.path().cmp(b.path()));
        writes.sort_by(|a, b| a.path().cmp(b.path()));
        plan.ops = removes;
        plan.ops.extend(writes);
        plan
    }

    /// Perform a plan. Each operation succeeds or fails on its own.
    pub fn apply(&self, plan: LinkPlan) -> LinkOutcome {
        let mut outcome = LinkOutcome {
            changes: Vec::new(),
            failures: plan.failures,
        };
        for failure in &outcome.failures {
            warn!(path = %failure.path.display(), error = %failure.error, "link not reconciled");
        }
        if plan.ops.is_empty() {
            return outcome;
        }

        let needs_dir = plan
            .ops
            .iter()
            .any(|op| !matches!(op, LinkOp::Remove { .. }));
        if needs_dir {
            if let Err(e) = std::fs::create_dir_all(&plan.dir) {
                warn!(path = %plan.dir.display(), error = %e, "cannot create link directory");
                outcome.failures.extend(plan.ops.iter().map(|op| link_failed(op.path(), &e)));
                return outcome;
            }
        }

        for op in plan.ops {
            let result = match &op {
                LinkOp::Create { path, target } => {
                    symlink(target, path).map(|()| (LinkAction::Created, Some(target)))
                }
                LinkOp::Repoint { path, target } => {
                    repoint(target, path).map(|()| (LinkAction::Repointed, Some(target)))
                }
                LinkOp::Remove { path } => remove_link(path).map(|()| (LinkAction::Removed, None)),
                LinkOp::Replace { path, target } => remove_path(path)
                    .and_then(|()| symlink(target, path))
                    .map(|()| (LinkAction::Replaced, Some(target))),
            };
            match result {
                Ok((action, target)) => {
                    info!(
                        path = %op.path().display(),
                        action = action.as_str(),
                        "link updated"
                    );
                    outcome.changes.push(LinkChange {
                        path: op.path().to_path_buf(),
                        action,
                        target: target.cloned(),
                    });
                }
                Err(e) => {
                    warn!(path = %op.path().display(), error = %e, "link update failed");
                    outcome.failures.push(link_failed(op.path(), &e));
                }
            }
        }
        outcome
    }

    fn points_into_store(&self, dir: &Path, target: &Path) -> bool {
        let absolute = if target.is_absolute() {
            target.to_path_buf()
        } else {
            dir.join(target)
        };
        self.store_roots.iter().any(|root| absolute.starts_with(root))
    }
}

/// Atomically swap an existing link for one pointing at `target`.
fn repoint(target: &Path, path: &Path) -> io::Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.tmp-{}", uuid::Uuid::now_v7()));
    symlink(target, &tmp)?;
    if let Err(e) = rename_link(&tmp, path) {
        let _ = remove_link(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

#[cfg(windows)]
fn symlink(target: &Path, path: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, path)
}

#[cfg(unix)]
fn rename_link(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::rename(from, to)
}

// Windows cannot rename over a directory symlink.
#[cfg(windows)]
fn rename_link(from: &Path, to: &Path) -> io::Result<()> {
    remove_link(to)?;
    std::fs::rename(from, to)
}

#[cfg(unix)]
fn remove_link(path: &Path) -> io::Result<()> {
    std::fs::remove_file(path)
}

#[cfg(windows)]
fn remove_link(path: &Path) -> io::Result<()> {
    std::fs::remove_dir(path).or_else(|_| std::fs::remove_file(path))
}

fn link_failed(path: &Path, err: &io::Error) -> LinkFailure {
    LinkFailure {
        path: path.to_path_buf(),
        error: EntityError::LinkFailed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        },
    }
}
