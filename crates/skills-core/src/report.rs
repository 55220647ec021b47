//! Structured result of a sync/update pass.
//!
//! The engine never prints; callers render this value (or serialize it).

use crate::types::{EntityError, RepoId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Overall result of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    /// No entity failed.
    Succeeded,
    /// Some entities failed, others were applied.
    Partial,
    /// Entities failed and none succeeded.
    Failed,
}

impl PassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// What happened to a repo this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoState {
    /// Resolved and materialized.
    Synced,
    /// Declares no skills; nothing to do.
    Skipped,
    /// Resolution or checkout failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillOutcome {
    pub name: String,
    pub location: String,
    /// Validated skill root inside the store entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EntityError>,
}

impl SkillOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoOutcome {
    pub repo: String,
    pub repo_id: RepoId,
    pub rev: String,
    pub state: RepoState,
    /// `resolved_sha` from the document before the pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_sha: Option<String>,
    /// Whether the revision was queried rather than taken from the document.
    pub requeried: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EntityError>,
    pub skills: Vec<SkillOutcome>,
}

impl RepoOutcome {
    /// True when the persisted identifier changes.
    pub fn sha_changed(&self) -> bool {
        self.resolved_sha.is_some() && self.resolved_sha != self.previous_sha
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkAction {
    Created,
    Repointed,
    Removed,
    /// A foreign entry was removed under `force` and the link created.
    Replaced,
}

impl LinkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Repointed => "repointed",
            Self::Removed => "removed",
            Self::Replaced => "replaced",
        }
    }
}

/// One applied filesystem change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkChange {
    pub path: PathBuf,
    pub action: LinkAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
}

/// A link that could not be brought to its desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFailure {
    pub path: PathBuf,
    pub error: EntityError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Whether resolved identifiers were written back.
    pub config_written: bool,
    pub repos: Vec<RepoOutcome>,
    pub links: Vec<LinkChange>,
    pub link_errors: Vec<LinkFailure>,
    pub status: PassStatus,
}

impl SyncReport {
    /// Entity failures across repos, skills and links.
    pub fn failure_count(&self) -> usize {
        let repo_and_skill: usize = self
            .repos
            .iter()
            .map(|r| {
                usize::from(r.error.is_some()) + r.skills.iter().filter(|s| !s.is_ok()).count()
            })
            .sum();
        repo_and_skill + self.link_errors.len()
    }

    /// Skills validated this pass.
    pub fn success_count(&self) -> usize {
        self.repos
            .iter()
            .flat_map(|r| &r.skills)
            .filter(|s| s.is_ok() && s.path.is_some())
            .count()
    }

    /// Derive the overall status from entity outcomes.
    pub fn compute_status(&self) -> PassStatus {
        match (self.failure_count(), self.success_count()) {
            (0, _) => PassStatus::Succeeded,
            (_, 0) => PassStatus::Failed,
            _ => PassStatus::Partial,
        }
    }

    /// All entity errors with a short label for the entity.
    pub fn errors(&self) -> Vec<(String, &EntityError)> {
        let mut out = Vec::new();
        for repo in &self.repos {
            if let Some(ref e) = repo.error {
                out.push((repo.repo.clone(), e));
            }
            for skill in &repo.skills {
                if let Some(ref e) = skill.error {
                    out.push((skill.name.clone(), e));
                }
            }
        }
        for link in &self.link_errors {
            out.push((link.path.display().to_string(), &link.error));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str, error: Option<EntityError>) -> SkillOutcome {
        SkillOutcome {
            name: name.to_string(),
            location: name.to_string(),
            path: error.is_none().then(|| PathBuf::from("/store").join(name)),
            error,
        }
    }

    fn report(skills: Vec<SkillOutcome>, link_errors: Vec<LinkFailure>) -> SyncReport {
        let now = Utc::now();
        SyncReport {
            mode: "sync".to_string(),
            started_at: now,
            finished_at: now,
            config_written: false,
            repos: vec![RepoOutcome {
                repo: "r".to_string(),
                repo_id: RepoId::from_locator("r"),
                rev: "v1".to_string(),
                state: RepoState::Synced,
                previous_sha: None,
                resolved_sha: Some("abc1234".to_string()),
                requeried: true,
                entry: None,
                error: None,
                skills,
            }],
            links: Vec::new(),
            link_errors,
            status: PassStatus::Succeeded,
        }
    }

    fn missing(name: &str) -> EntityError {
        EntityError::ManifestMissing {
            skill: name.to_string(),
            path: PathBuf::from(name),
        }
    }

    #[test]
    fn status_succeeded_without_failures() {
        assert_eq!(
            report(vec![skill("a", None)], Vec::new()).compute_status(),
            PassStatus::Succeeded
        );
        assert_eq!(
            report(Vec::new(), Vec::new()).compute_status(),
            PassStatus::Succeeded
        );
    }

    #[test]
    fn status_partial_with_mixed_outcomes() {
        let r = report(vec![skill("a", None), skill("b", Some(missing("b")))], Vec::new());
        assert_eq!(r.compute_status(), PassStatus::Partial);
        assert_eq!(r.errors().len(), 1);
    }

    #[test]
    fn status_failed_when_nothing_succeeded() {
        let r = report(vec![skill("b", Some(missing("b")))], Vec::new());
        assert_eq!(r.compute_status(), PassStatus::Failed);
    }

    #[test]
    fn link_errors_count_as_failures() {
        let r = report(
            vec![skill("a", None)],
            vec![LinkFailure {
                path: PathBuf::from("/p/a"),
                error: EntityError::LinkCollision {
                    path: PathBuf::from("/p/a"),
                },
            }],
        );
        assert_eq!(r.failure_count(), 1);
        assert_eq!(r.compute_status(), PassStatus::Partial);
    }
}
