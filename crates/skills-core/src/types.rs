//! Core types shared by the reconciliation engine and its callers.

use crate::config::{is_full_commit_id, RepoConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;

/// Longest slug kept in front of the hash suffix.
const REPO_ID_SLUG_MAX: usize = 48;

/// Filesystem-safe identifier derived from a repo locator.
///
/// `<slug>-<hash12>`: the slug keeps ids readable in the store, the SHA-256
/// prefix of the exact locator keeps distinct locators apart even when their
/// slugs coincide (`a/b` vs `a_b`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(String);

impl RepoId {
    pub fn from_locator(locator: &str) -> Self {
        let mut slug = String::with_capacity(locator.len());
        let mut pending_sep = false;
        for c in locator.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_sep && !slug.is_empty() {
                    slug.push('_');
                }
                pending_sep = false;
                slug.push(c.to_ascii_lowercase());
            } else {
                pending_sep = true;
            }
        }
        slug.truncate(REPO_ID_SLUG_MAX);
        let slug = slug.trim_end_matches('_');

        let digest = Sha256::digest(locator.as_bytes());
        let hash: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();

        if slug.is_empty() {
            Self(hash)
        } else {
            Self(format!("{slug}-{hash}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RepoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which repos `update` re-resolves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateScope {
    #[default]
    All,
    /// Repos named by locator, plus the repos owning the named skills.
    Only {
        repos: Vec<String>,
        skills: Vec<String>,
    },
}

impl UpdateScope {
    pub fn includes(&self, repo: &RepoConfig) -> bool {
        match self {
            Self::All => true,
            Self::Only { repos, skills } => {
                repos.iter().any(|r| *r == repo.repo)
                    || repo.skills.iter().any(|s| skills.contains(&s.name))
            }
        }
    }
}

/// The operation a pass performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Reuse persisted resolutions; resolve only what is unresolved.
    Sync,
    /// Re-query revisions for the scope, bypassing persisted resolutions.
    Update(UpdateScope),
}

impl SyncMode {
    /// Whether `repo` must be resolved from its `rev` this pass.
    ///
    /// A persisted resolution is stale once `rev` is itself a full commit id
    /// naming a different commit.
    pub fn requery(&self, repo: &RepoConfig) -> bool {
        let stale = match repo.resolved_sha {
            None => true,
            Some(ref sha) => is_full_commit_id(&repo.rev) && !repo.rev.eq_ignore_ascii_case(sha),
        };
        match self {
            Self::Sync => stale,
            Self::Update(scope) => scope.includes(repo) || stale,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Update(_) => "update",
        }
    }
}

/// Failure scoped to one repo, skill, or link.
///
/// These never abort a pass; they are attached to the entity's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityError {
    #[error("cannot resolve revision '{rev}' of {repo}: {reason}")]
    UnresolvableRevision {
        repo: String,
        rev: String,
        reason: String,
    },
    #[error("source unreachable: {repo}: {reason}")]
    SourceUnreachable { repo: String, reason: String },
    #[error("commit {sha} not found in {repo}")]
    CommitNotFound { repo: String, sha: String },
    #[error("store entry for {repo} at {} unusable: {reason}", path.display())]
    StoreFailed {
        repo: String,
        path: PathBuf,
        reason: String,
    },
    #[error("invalid location '{location}' for skill {skill}: {reason}")]
    InvalidSkillLocation {
        skill: String,
        location: String,
        reason: String,
    },
    #[error("missing SKILL.md for {skill} at {}", path.display())]
    ManifestMissing { skill: String, path: PathBuf },
    #[error("path exists and is not a managed link: {}", path.display())]
    LinkCollision { path: PathBuf },
    #[error("failed to update link {}: {reason}", path.display())]
    LinkFailed { path: PathBuf, reason: String },
    #[error("cancelled")]
    Cancelled,
}

impl EntityError {
    /// Whether retrying the same pass later might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceUnreachable { .. } | Self::Cancelled)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnresolvableRevision { .. } => "unresolvable_revision",
            Self::SourceUnreachable { .. } => "source_unreachable",
            Self::CommitNotFound { .. } => "commit_not_found",
            Self::StoreFailed { .. } => "store_failed",
            Self::InvalidSkillLocation { .. } => "invalid_skill_location",
            Self::ManifestMissing { .. } => "manifest_missing",
            Self::LinkCollision { .. } => "link_collision",
            Self::LinkFailed { .. } => "link_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SkillConfig;

    fn repo(locator: &str, sha: Option<&str>, skills: &[&str]) -> RepoConfig {
        RepoConfig {
            repo: locator.to_string(),
            rev: "v1".to_string(),
            resolved_sha: sha.map(str::to_string),
            skills: skills
                .iter()
                .map(|name| SkillConfig {
                    name: (*name).to_string(),
                    location: (*name).to_string(),
                    agents: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn repo_id_is_stable_and_filesystem_safe() {
        let a = RepoId::from_locator("https://github.com/acme/skills.git");
        let b = RepoId::from_locator("https://github.com/acme/skills.git");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("https_github_com_acme_skills_git-"));
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn repo_id_distinguishes_colliding_slugs() {
        let a = RepoId::from_locator("https://example.com/a/b");
        let b = RepoId::from_locator("https://example.com/a_b");
        assert_ne!(a, b);
    }

    #[test]
    fn repo_id_of_symbol_only_locator_is_hash() {
        let id = RepoId::from_locator("///");
        assert_eq!(id.as_str().len(), 12);
    }

    #[test]
    fn sync_requeries_only_unresolved() {
        let resolved = repo("r", Some("abcdef1"), &[]);
        let unresolved = repo("r", None, &[]);
        assert!(!SyncMode::Sync.requery(&resolved));
        assert!(SyncMode::Sync.requery(&unresolved));
    }

    #[test]
    fn differing_commit_rev_overrides_resolution() {
        let a = "a".repeat(40);
        let b = "b".repeat(40);
        let mut r = repo("r", Some(&a), &[]);
        r.rev = b.clone();
        assert!(SyncMode::Sync.requery(&r));

        r.rev = a.to_ascii_uppercase();
        assert!(!SyncMode::Sync.requery(&r));

        let other = UpdateScope::Only {
            repos: vec!["elsewhere".to_string()],
            skills: Vec::new(),
        };
        r.rev = b;
        assert!(SyncMode::Update(other).requery(&r));
    }

    #[test]
    fn update_scope_selects_by_repo_or_skill() {
        let r = repo("https://example.com/x", Some("abcdef1"), &["foo"]);
        assert!(SyncMode::Update(UpdateScope::All).requery(&r));

        let by_skill = UpdateScope::Only {
            repos: Vec::new(),
            skills: vec!["foo".to_string()],
        };
        assert!(SyncMode::Update(by_skill).requery(&r));

        let other = UpdateScope::Only {
            repos: vec!["https://example.com/y".to_string()],
            skills: Vec::new(),
        };
        assert!(!SyncMode::Update(other).requery(&r));
    }

    #[test]
    fn entity_error_serializes_with_kind_tag() {
        let err = EntityError::LinkCollision {
            path: PathBuf::from("/p/foo"),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "link_collision");
        assert_eq!(err.kind(), "link_collision");
    }
}
