//! One synchronization pass over the whole config.
//!
//! Order per pass: resolve, materialize and validate every repo (one task
//! per repo, bounded by `jobs`), write resolved ids back in a single atomic
//! save, then reconcile every managed link directory. Entity failures are
//! recorded in the report; only a failed write-back aborts the pass.

use crate::git::{resolve_locator, Git, DEFAULT_GIT_TIMEOUT};
use crate::links::{LinkOutcome, ManagedDir, Reconciler};
use crate::locks::RepoLocks;
use crate::resolver::Resolver;
use crate::store::StoreManager;
use crate::validate::validate_skill;
use chrono::Utc;
use skills_core::config::is_valid_agent_name;
use skills_core::{
    Config, ConfigError, EntityError, RepoConfig, RepoId, RepoOutcome, RepoState, SkillOutcome,
    SyncMode, SyncReport,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of repos processed concurrently.
pub const DEFAULT_JOBS: usize = 4;

/// Failures that abort the whole pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to write resolved revisions to {}: {source}", path.display())]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error("store directory {} unavailable: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Replace foreign entries that occupy a desired link path.
    pub force: bool,
    pub jobs: usize,
    /// Timeout for each git invocation.
    pub git_timeout: Duration,
    pub git_bin: PathBuf,
    pub cancel: CancellationToken,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            jobs: DEFAULT_JOBS,
            git_timeout: DEFAULT_GIT_TIMEOUT,
            git_bin: PathBuf::from("git"),
            cancel: CancellationToken::new(),
        }
    }
}

/// The directory a config file governs: its canonical parent.
pub fn project_root_of(config_path: &Path) -> PathBuf {
    let parent = match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    parent.canonicalize().unwrap_or(parent)
}

#[derive(Debug)]
pub struct SyncOrchestrator {
    config_path: PathBuf,
    project_root: PathBuf,
    options: SyncOptions,
}

/// Everything a repo task needs, cheap to clone into it.
#[derive(Debug, Clone)]
struct RepoTask {
    project_root: PathBuf,
    resolver: Resolver,
    store: StoreManager,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(config_path: impl Into<PathBuf>, options: SyncOptions) -> Self {
        let config_path = config_path.into();
        let project_root = project_root_of(&config_path);
        Self {
            config_path,
            project_root,
            options,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Run one pass. `config` is the document as loaded from `config_path`.
    pub async fn run(&self, config: &Config, mode: &SyncMode) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();
        let store_root = config.store_root(&self.project_root);
        std::fs::create_dir_all(&store_root).map_err(|source| SyncError::StoreUnavailable {
            path: store_root.clone(),
            source,
        })?;

        info!(
            mode = mode.as_str(),
            repos = config.repos.len(),
            store = %store_root.display(),
            "sync pass started"
        );

        let git = Git::new(&self.options.git_bin, self.options.git_timeout);
        let task = RepoTask {
            project_root: self.project_root.clone(),
            resolver: Resolver::new(git.clone()),
            store: StoreManager::new(&store_root, git, RepoLocks::new()),
            semaphore: Arc::new(Semaphore::new(self.options.jobs.max(1))),
            cancel: self.options.cancel.clone(),
        };

        let handles: Vec<_> = config
            .repos
            .iter()
            .map(|repo| {
                let task = task.clone();
                let repo = repo.clone();
                let requery = mode.requery(&repo);
                tokio::spawn(async move { task.sync_repo(repo, requery).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (handle, repo) in handles.into_iter().zip(&config.repos) {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => {
                    let mut outcome = base_outcome(repo, mode.requery(repo));
                    fail(&mut outcome, repo, EntityError::Cancelled);
                    outcomes.push(outcome);
                }
            }
        }

        let config_written = self.write_back(config, &outcomes)?;

        let links = if self.options.cancel.is_cancelled() {
            info!("pass cancelled, links left unchanged");
            LinkOutcome::default()
        } else {
            let dirs = self.managed_dirs(config, &outcomes);
            reconcile_all(&store_root, self.options.force, dirs).await
        };

        let mut report = SyncReport {
            mode: mode.as_str().to_string(),
            started_at,
            finished_at: Utc::now(),
            config_written,
            repos: outcomes,
            links: links.changes,
            link_errors: links.failures,
            status: skills_core::PassStatus::Succeeded,
        };
        report.status = report.compute_status();
        info!(
            status = report.status.as_str(),
            failures = report.failure_count(),
            link_changes = report.links.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    /// Persist changed resolutions in one atomic save. Returns whether a
    /// write happened.
    fn write_back(&self, config: &Config, outcomes: &[RepoOutcome]) -> Result<bool, SyncError> {
        let mut staged = config.clone();
        let mut changed = false;
        for (repo, outcome) in staged.repos.iter_mut().zip(outcomes) {
            if outcome.state == RepoState::Synced && outcome.sha_changed() {
                repo.resolved_sha.clone_from(&outcome.resolved_sha);
                changed = true;
            }
        }
        if !changed {
            debug!("resolved revisions unchanged");
            return Ok(false);
        }
        staged
            .save(&self.config_path)
            .map_err(|source| SyncError::ConfigWriteFailed {
                path: self.config_path.clone(),
                source,
            })?;
        info!(path = %self.config_path.display(), "wrote resolved revisions");
        Ok(true)
    }

    /// Desired and preserved link names for every managed directory.
    fn managed_dirs(&self, config: &Config, outcomes: &[RepoOutcome]) -> Vec<ManagedDir> {
        let agents_root = Config::agents_root(&self.project_root);

        let mut agents: BTreeSet<String> = config.agents.keys().cloned().collect();
        agents.extend(
            config
                .repos
                .iter()
                .flat_map(|r| &r.skills)
                .flat_map(|s| s.agents.iter().cloned()),
        );
        agents.extend(existing_agent_dirs(&agents_root));

        let mut agent_dirs: BTreeMap<String, ManagedDir> = agents
            .into_iter()
            .map(|agent| {
                let dir = ManagedDir {
                    path: agents_root.join(&agent),
                    exclusive: true,
                    ..Default::default()
                };
                (agent, dir)
            })
            .collect();

        let mut target_dirs: BTreeMap<PathBuf, ManagedDir> = BTreeMap::new();
        let mut target_of: BTreeMap<&str, PathBuf> = BTreeMap::new();
        for (agent, agent_config) in &config.agents {
            if let Some(ref target_dir) = agent_config.target_dir {
                let path = self.project_root.join(target_dir);
                target_dirs.entry(path.clone()).or_insert_with(|| ManagedDir {
                    path: path.clone(),
                    exclusive: false,
                    ..Default::default()
                });
                target_of.insert(agent.as_str(), path);
            }
        }

        for (repo, outcome) in config.repos.iter().zip(outcomes) {
            for (skill, skill_outcome) in repo.skills.iter().zip(&outcome.skills) {
                let linked = match (&outcome.state, &skill_outcome.path) {
                    (RepoState::Synced, Some(path)) if skill_outcome.is_ok() => Some(path),
                    _ => None,
                };
                for agent in &skill.agents {
                    let mut dirs: Vec<&mut ManagedDir> = Vec::with_capacity(2);
                    if let Some(dir) = agent_dirs.get_mut(agent) {
                        dirs.push(dir);
                    }
                    let target = target_of.get(agent.as_str());
                    if let Some(dir) = target.and_then(|p| target_dirs.get_mut(p)) {
                        dirs.push(dir);
                    }
                    for dir in dirs {
                        match linked {
                            Some(path) => {
                                dir.desired.insert(skill.name.clone(), path.clone());
                            }
                            None => {
                                dir.preserve.insert(skill.name.clone());
                            }
                        }
                    }
                }
            }
        }

        agent_dirs
            .into_values()
            .chain(target_dirs.into_values())
            .collect()
    }
}

impl RepoTask {
    async fn sync_repo(self, repo: RepoConfig, requery: bool) -> RepoOutcome {
        let mut outcome = base_outcome(&repo, requery);
        if repo.skills.is_empty() {
            debug!(repo = %repo.repo, "no skills declared, skipping");
            outcome.state = RepoState::Skipped;
            outcome.resolved_sha = repo.resolved_sha.clone();
            return outcome;
        }

        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EntityError::Cancelled),
            result = self.materialize(&repo, &outcome.repo_id, requery) => result,
        };

        match result {
            Ok((sha, entry)) => {
                outcome.skills = repo
                    .skills
                    .iter()
                    .map(|skill| {
                        let result = validate_skill(&entry, &skill.name, &skill.location);
                        if let Err(ref e) = result {
                            warn!(
                                repo = %repo.repo,
                                skill = %skill.name,
                                error = %e,
                                "skill invalid"
                            );
                        }
                        SkillOutcome {
                            name: skill.name.clone(),
                            location: skill.location.clone(),
                            path: result.as_ref().ok().cloned(),
                            error: result.err(),
                        }
                    })
                    .collect();
                outcome.resolved_sha = Some(sha);
                outcome.entry = Some(entry);
            }
            Err(e) => fail(&mut outcome, &repo, e),
        }
        outcome
    }

    /// Resolve and check out; returns the full commit id and entry root.
    async fn materialize(
        &self,
        repo: &RepoConfig,
        id: &RepoId,
        requery: bool,
    ) -> Result<(String, PathBuf), EntityError> {
        let _permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| EntityError::Cancelled)?;

        let source = resolve_locator(&self.project_root, &repo.repo);
        let sha = match (&repo.resolved_sha, requery) {
            (Some(sha), false) => sha.clone(),
            _ => {
                let history = self.store.existing_history(id);
                let sha = self
                    .resolver
                    .resolve(&repo.repo, &source, &repo.rev, history.as_deref())
                    .await?;
                debug!(repo = %repo.repo, rev = %repo.rev, sha = %sha, "resolved revision");
                sha
            }
        };

        let entry = self.store.ensure_checkout(&repo.repo, &source, id, &sha).await?;
        Ok((entry.sha, entry.root))
    }
}

fn base_outcome(repo: &RepoConfig, requery: bool) -> RepoOutcome {
    RepoOutcome {
        repo: repo.repo.clone(),
        repo_id: RepoId::from_locator(&repo.repo),
        rev: repo.rev.clone(),
        state: RepoState::Synced,
        previous_sha: repo.resolved_sha.clone(),
        resolved_sha: None,
        requeried: requery,
        entry: None,
        error: None,
        skills: Vec::new(),
    }
}

/// Mark a repo failed; its skills are listed without being validated.
fn fail(outcome: &mut RepoOutcome, repo: &RepoConfig, error: EntityError) {
    warn!(repo = %repo.repo, error = %error, "repo not synced");
    outcome.state = RepoState::Failed;
    outcome.error = Some(error);
    outcome.skills = repo
        .skills
        .iter()
        .map(|s| SkillOutcome {
            name: s.name.clone(),
            location: s.location.clone(),
            path: None,
            error: None,
        })
        .collect();
}

/// Agent directories already on disk, so agents dropped from config get
/// their links cleaned up.
fn existing_agent_dirs(agents_root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(agents_root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| is_valid_agent_name(name))
        .collect()
}

/// Reconcile each directory on the blocking pool.
async fn reconcile_all(store_root: &Path, force: bool, dirs: Vec<ManagedDir>) -> LinkOutcome {
    let reconciler = Arc::new(Reconciler::new(store_root, force));
    let handles: Vec<_> = dirs
        .into_iter()
        .map(|dir| {
            let reconciler = Arc::clone(&reconciler);
            tokio::task::spawn_blocking(move || reconciler.reconcile(&dir))
        })
        .collect();

    let mut total = LinkOutcome::default();
    for handle in handles {
        match handle.await {
            Ok(outcome) => {
                total.changes.extend(outcome.changes);
                total.failures.extend(outcome.failures);
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => warn!(error = %e, "link task cancelled"),
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{commit, init_repo, tag};
    use skills_core::{PassStatus, SkillConfig};
    use tempfile::TempDir;

    fn project_with(
        repo: &Path,
        rev: &str,
        skills: &[(&str, &str, &[&str])],
    ) -> (TempDir, PathBuf, Config) {
        let project = TempDir::new().unwrap();
        let config_path = project.path().join(".agent-skills.yaml");
        let mut config = Config::default();
        config.repos.push(RepoConfig {
            repo: repo.to_string_lossy().into_owned(),
            rev: rev.to_string(),
            resolved_sha: None,
            skills: skills
                .iter()
                .map(|(name, location, agents)| SkillConfig {
                    name: (*name).to_string(),
                    location: (*location).to_string(),
                    agents: agents.iter().map(|a| (*a).to_string()).collect(),
                })
                .collect(),
        });
        config.save(&config_path).unwrap();
        (project, config_path, config)
    }

    #[test]
    fn project_root_of_bare_file_name() {
        let root = project_root_of(Path::new(".agent-skills.yaml"));
        assert!(root.is_absolute() || root == Path::new("."));
    }

    #[tokio::test]
    async fn sync_links_into_agents_and_target_dirs() {
        let repo = init_repo();
        let sha = commit(repo.path(), &[("foo/SKILL.md", "# foo")], "add foo");
        tag(repo.path(), "v1.0.0");
        let (project, config_path, config) =
            project_with(repo.path(), "v1.0.0", &[("foo", "foo", &["codex"])]);

        let orchestrator = SyncOrchestrator::new(&config_path, SyncOptions::default());
        let report = orchestrator.run(&config, &SyncMode::Sync).await.unwrap();
        assert_eq!(report.status, PassStatus::Succeeded);
        assert!(report.config_written);

        let root = orchestrator.project_root();
        let agent_link = root.join(".agent-skills/agents/codex/foo");
        let target_link = root.join(".codex/skills/foo");
        let expected = config
            .store_root(root)
            .join(RepoId::from_locator(&config.repos[0].repo).as_str())
            .join(&sha)
            .join("foo");
        assert_eq!(std::fs::read_link(agent_link).unwrap(), expected);
        assert_eq!(std::fs::read_link(target_link).unwrap(), expected);

        let saved = Config::load(&config_path).unwrap();
        assert_eq!(saved.repos[0].resolved_sha.as_deref(), Some(sha.as_str()));
        drop(project);
    }

    #[tokio::test]
    async fn sync_follows_commit_rev_over_stale_resolution() {
        let repo = init_repo();
        let first = commit(repo.path(), &[("foo/SKILL.md", "# foo v1")], "first");
        let second = commit(repo.path(), &[("foo/SKILL.md", "# foo v2")], "second");
        let (_project, config_path, mut config) =
            project_with(repo.path(), &second, &[("foo", "foo", &["codex"])]);
        config.repos[0].resolved_sha = Some(first);
        config.save(&config_path).unwrap();

        let orchestrator = SyncOrchestrator::new(&config_path, SyncOptions::default());
        let report = orchestrator.run(&config, &SyncMode::Sync).await.unwrap();
        assert_eq!(report.status, PassStatus::Succeeded);
        assert_eq!(report.repos[0].resolved_sha.as_deref(), Some(second.as_str()));

        let root = orchestrator.project_root();
        let expected = config
            .store_root(root)
            .join(RepoId::from_locator(&config.repos[0].repo).as_str())
            .join(&second)
            .join("foo");
        let link = root.join(".agent-skills/agents/codex/foo");
        assert_eq!(std::fs::read_link(link).unwrap(), expected);

        let saved = Config::load(&config_path).unwrap();
        assert_eq!(saved.repos[0].resolved_sha.as_deref(), Some(second.as_str()));
    }

    #[tokio::test]
    async fn skill_failure_preserves_existing_link() {
        let repo = init_repo();
        commit(repo.path(), &[("foo/SKILL.md", "# foo")], "add foo");
        tag(repo.path(), "v1");
        let (_project, config_path, mut config) =
            project_with(repo.path(), "v1", &[("foo", "foo", &["codex"])]);

        let orchestrator = SyncOrchestrator::new(&config_path, SyncOptions::default());
        orchestrator.run(&config, &SyncMode::Sync).await.unwrap();
        let link = orchestrator
            .project_root()
            .join(".agent-skills/agents/codex/foo");
        let before = std::fs::read_link(&link).unwrap();

        config = Config::load(&config_path).unwrap();
        config.repos[0].skills[0].location = "missing".to_string();
        let report = orchestrator.run(&config, &SyncMode::Sync).await.unwrap();
        assert_eq!(report.status, PassStatus::Failed);
        assert!(report.links.is_empty());
        assert_eq!(std::fs::read_link(&link).unwrap(), before);
    }

    #[tokio::test]
    async fn cancelled_pass_touches_nothing() {
        let repo = init_repo();
        commit(repo.path(), &[("foo/SKILL.md", "# foo")], "add foo");
        tag(repo.path(), "v1");
        let (_project, config_path, config) =
            project_with(repo.path(), "v1", &[("foo", "foo", &["codex"])]);

        let options = SyncOptions::default();
        options.cancel.cancel();
        let orchestrator = SyncOrchestrator::new(&config_path, options);
        let report = orchestrator.run(&config, &SyncMode::Sync).await.unwrap();

        assert_eq!(report.status, PassStatus::Failed);
        assert_eq!(report.repos[0].error, Some(EntityError::Cancelled));
        assert!(!report.config_written);
        assert!(!orchestrator
            .project_root()
            .join(".agent-skills/agents/codex/foo")
            .exists());
    }

    #[tokio::test]
    async fn repo_without_skills_is_skipped() {
        let (_project, config_path, config) =
            project_with(Path::new("/nonexistent/repo"), "v1", &[]);
        let orchestrator = SyncOrchestrator::new(&config_path, SyncOptions::default());
        let report = orchestrator.run(&config, &SyncMode::Sync).await.unwrap();
        assert_eq!(report.repos[0].state, RepoState::Skipped);
        assert_eq!(report.status, PassStatus::Succeeded);
    }
}
