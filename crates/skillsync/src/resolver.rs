//! Revision resolution: tag, branch or commit reference to a commit id.

use crate::git::{Git, GitError, RemoteRef};
pub use skills_core::config::is_full_commit_id;
use skills_core::config::is_hex_id;
use skills_core::EntityError;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    git: Git,
}

impl Resolver {
    pub fn new(git: Git) -> Self {
        Self { git }
    }

    /// Resolve `rev` of the repo at `source` to a single commit id.
    ///
    /// `repo` is the locator as written in config, used in errors. `history`
    /// is the repo's local history store, when one exists; it is only used
    /// to expand abbreviated ids the remote does not advertise.
    pub async fn resolve(
        &self,
        repo: &str,
        source: &str,
        rev: &str,
        history: Option<&Path>,
    ) -> Result<String, EntityError> {
        if is_full_commit_id(rev) {
            debug!(repo = %repo, rev = %rev, "revision is a full commit id");
            return Ok(rev.to_ascii_lowercase());
        }

        let refs = self
            .git
            .ls_remote(source, rev)
            .await
            .map_err(|e| unreachable_error(repo, e))?;

        let mut candidates: Vec<&str> = matching_commits(&refs, rev);
        candidates.sort_unstable();
        candidates.dedup();

        match candidates.as_slice() {
            [sha] => return Ok((*sha).to_string()),
            [] => {}
            many => {
                return Err(EntityError::UnresolvableRevision {
                    repo: repo.to_string(),
                    rev: rev.to_string(),
                    reason: format!("ambiguous: matches {} commits", many.len()),
                })
            }
        }

        if is_hex_id(rev, 7, 39) {
            if let Some(git_dir) = history {
                match self.git.expand_commit(git_dir, rev).await {
                    Ok(Some(sha)) => return Ok(sha),
                    Ok(None) => {}
                    Err(e) => debug!(repo = %repo, error = %e, "local expansion failed"),
                }
            }
        }

        Err(EntityError::UnresolvableRevision {
            repo: repo.to_string(),
            rev: rev.to_string(),
            reason: "no matching tag, branch or commit".to_string(),
        })
    }
}

/// Commits of the refs that `rev` can name, one per ref. A peeled `^{}`
/// entry replaces the annotated tag object it belongs to.
fn matching_commits<'a>(refs: &'a [RemoteRef], rev: &str) -> Vec<&'a str> {
    let names = if rev == "HEAD" || rev.starts_with("refs/") {
        vec![rev.to_string()]
    } else {
        vec![format!("refs/tags/{rev}"), format!("refs/heads/{rev}")]
    };

    names
        .iter()
        .filter_map(|name| {
            let peeled = format!("{name}^{{}}");
            refs.iter()
                .find(|r| r.name == peeled)
                .or_else(|| refs.iter().find(|r| r.name == *name))
                .map(|r| r.sha.as_str())
        })
        .collect()
}

pub(crate) fn unreachable_error(repo: &str, err: GitError) -> EntityError {
    EntityError::SourceUnreachable {
        repo: repo.to_string(),
        reason: err.to_string(),
    }
}
