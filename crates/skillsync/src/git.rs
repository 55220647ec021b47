//! Git plumbing for the reconciliation engine.
//!
//! Every call shells out to the git CLI with a per-invocation timeout. The
//! child is killed when its future is dropped, so cancelling a pass never
//! leaves a git process behind.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Default timeout for one git invocation.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("invalid utf-8 in git output")]
    InvalidUtf8,
    #[error("git {command} timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, GitError>;

/// A ref advertised by `git ls-remote`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub sha: String,
    pub name: String,
}

/// Handle to the git CLI.
#[derive(Debug, Clone)]
pub struct Git {
    bin: PathBuf,
    timeout: Duration,
}

impl Default for Git {
    fn default() -> Self {
        Self::new("git", DEFAULT_GIT_TIMEOUT)
    }
}

impl Git {
    pub fn new(bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    /// Run git and return its raw output, whatever the exit status.
    async fn output(&self, cwd: Option<&Path>, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(args = ?args, "git");

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(GitError::Timeout {
                command: args.join(" "),
                timeout: self.timeout,
            }),
        }
    }

    /// Run git, failing on non-zero exit; returns trimmed stdout.
    async fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String> {
        let output = self.output(cwd, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::CommandFailed(format!(
                "git {}: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8)?;
        Ok(stdout.trim().to_string())
    }

    /// List refs of `source` matching `pattern`, with the peeled `^{}` entry
    /// of each annotated tag (git only lists those for a matching pattern).
    pub async fn ls_remote(&self, source: &str, pattern: &str) -> Result<Vec<RemoteRef>> {
        let peeled = format!("{pattern}^{{}}");
        let stdout = self
            .run(None, &["ls-remote", source, pattern, &peeled])
            .await?;
        Ok(parse_ls_remote(&stdout))
    }

    /// Bare-clone `source` into `dest`.
    pub async fn clone_bare(&self, source: &str, dest: &Path) -> Result<()> {
        let dest = dest.to_string_lossy();
        self.run(None, &["clone", "--bare", "--quiet", source, dest.as_ref()])
            .await?;
        Ok(())
    }

    /// Fetch every branch and tag into a bare history store, force-updating
    /// moved refs (re-tagged releases included).
    pub async fn fetch_all(&self, git_dir: &Path) -> Result<()> {
        let git_dir = git_dir.to_string_lossy();
        self.run(
            None,
            &[
                "--git-dir",
                git_dir.as_ref(),
                "fetch",
                "--quiet",
                "--update-head-ok",
                "origin",
                "+refs/heads/*:refs/heads/*",
                "+refs/tags/*:refs/tags/*",
            ],
        )
        .await?;
        Ok(())
    }

    /// Fetch a single commit by id (servers may refuse unadvertised ids).
    pub async fn fetch_commit(&self, git_dir: &Path, sha: &str) -> Result<()> {
        let git_dir = git_dir.to_string_lossy();
        self.run(
            None,
            &["--git-dir", git_dir.as_ref(), "fetch", "--quiet", "origin", sha],
        )
        .await?;
        Ok(())
    }

    /// Whether `sha` names a commit present in the store.
    pub async fn has_commit(&self, git_dir: &Path, sha: &str) -> Result<bool> {
        let git_dir = git_dir.to_string_lossy();
        let object = format!("{sha}^{{commit}}");
        let output = self
            .output(None, &["--git-dir", git_dir.as_ref(), "cat-file", "-e", &object])
            .await?;
        Ok(output.status.success())
    }

    /// Expand an abbreviated commit id, if it is unique in the store.
    pub async fn expand_commit(&self, git_dir: &Path, abbrev: &str) -> Result<Option<String>> {
        let git_dir = git_dir.to_string_lossy();
        let object = format!("{abbrev}^{{commit}}");
        let output = self
            .output(
                None,
                &["--git-dir", git_dir.as_ref(), "rev-parse", "--verify", "--quiet", &object],
            )
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8)?;
        Ok(Some(sha.trim().to_string()))
    }

    /// Materialize `sha` as a detached worktree at `path`.
    pub async fn worktree_add(&self, git_dir: &Path, path: &Path, sha: &str) -> Result<()> {
        let git_dir = git_dir.to_string_lossy();
        let path = path.to_string_lossy();
        self.run(
            None,
            &[
                "--git-dir",
                git_dir.as_ref(),
                "worktree",
                "add",
                "--detach",
                "--quiet",
                path.as_ref(),
                sha,
            ],
        )
        .await?;
        Ok(())
    }

    /// Force-remove a worktree registration and its directory.
    pub async fn worktree_remove(&self, git_dir: &Path, path: &Path) -> Result<()> {
        let git_dir = git_dir.to_string_lossy();
        let path = path.to_string_lossy();
        self.run(
            None,
            &[
                "--git-dir",
                git_dir.as_ref(),
                "worktree",
                "remove",
                "--force",
                path.as_ref(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Drop registrations of worktrees whose directories are gone.
    pub async fn worktree_prune(&self, git_dir: &Path) -> Result<()> {
        let git_dir = git_dir.to_string_lossy();
        self.run(None, &["--git-dir", git_dir.as_ref(), "worktree", "prune"])
            .await?;
        Ok(())
    }

    /// Commit checked out in a worktree.
    pub async fn head(&self, worktree: &Path) -> Result<String> {
        self.run(Some(worktree), &["rev-parse", "HEAD"]).await
    }

    /// Whether tracked files in a worktree match its HEAD.
    pub async fn is_clean(&self, worktree: &Path) -> Result<bool> {
        let stdout = self
            .run(
                Some(worktree),
                &["status", "--porcelain", "--untracked-files=no"],
            )
            .await?;
        Ok(stdout.is_empty())
    }
}

/// Parse `<sha>\t<ref>` lines.
fn parse_ls_remote(stdout: &str) -> Vec<RemoteRef> {
    stdout
        .lines()
        .filter_map(|line| {
            let (sha, name) = line.split_once('\t')?;
            Some(RemoteRef {
                sha: sha.trim().to_ascii_lowercase(),
                name: name.trim().to_string(),
            })
        })
        .collect()
}

/// Whether a locator names a remote (URL or scp-like `host:path`).
pub fn is_remote_locator(locator: &str) -> bool {
    if locator.contains("://") {
        return true;
    }
    match locator.split_once(':') {
        // Single letter before ':' is a Windows drive.
        Some((host, _)) => host.len() > 1 && !host.contains('/') && !host.contains('\\'),
        None => false,
    }
}

/// Turn a locator into something git can use from any working directory:
/// relative local paths are anchored at the project root.
pub fn resolve_locator(project_root: &Path, locator: &str) -> String {
    if is_remote_locator(locator) {
        return locator.to_string();
    }
    let path = Path::new(locator);
    if path.is_absolute() {
        locator.to_string()
    } else {
        project_root.join(path).to_string_lossy().into_owned()
    }
}
