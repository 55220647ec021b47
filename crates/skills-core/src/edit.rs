//! Declarative edits of the config document (`install`, `enable`, `disable`).
//!
//! These only touch declarative fields; `resolved_sha` is cleared when a
//! repo's `rev` changes and otherwise left to the sync engine.

use crate::config::{is_valid_agent_name, Config, ConfigError, RepoConfig, Result, SkillConfig};

/// Parameters of an `install` edit.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub repo: String,
    pub rev: String,
    pub skill: Option<SkillConfig>,
    /// Replace a skill of the same name wherever it is configured.
    pub reinstall: bool,
}

/// What an `install` edit changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallSummary {
    pub repo_added: bool,
    pub rev_changed: bool,
    pub skill_added: bool,
    pub skill_replaced: bool,
}

impl Config {
    /// Add or update a repo and optionally one of its skills.
    pub fn install(&mut self, request: InstallRequest) -> Result<InstallSummary> {
        let mut summary = InstallSummary::default();

        if let Some(ref skill) = request.skill {
            let unchanged = self
                .skill(&skill.name)
                .map(|(owner, existing)| owner.repo == request.repo && existing == skill);
            match unchanged {
                None | Some(true) => {}
                Some(false) if request.reinstall => {
                    self.remove_skill(&skill.name);
                    summary.skill_replaced = true;
                }
                Some(false) => return Err(ConfigError::SkillExists(skill.name.clone())),
            }
        }

        let index = match self.repos.iter().position(|r| r.repo == request.repo) {
            Some(i) => i,
            None => {
                self.repos.push(RepoConfig {
                    repo: request.repo.clone(),
                    rev: request.rev.clone(),
                    resolved_sha: None,
                    skills: Vec::new(),
                });
                summary.repo_added = true;
                self.repos.len() - 1
            }
        };

        let repo = &mut self.repos[index];
        if repo.rev != request.rev {
            repo.rev.clone_from(&request.rev);
            repo.resolved_sha = None;
            summary.rev_changed = true;
        }

        if let Some(skill) = request.skill {
            if !repo.skills.iter().any(|s| s.name == skill.name) {
                repo.skills.push(skill);
                summary.skill_added = true;
            }
        }

        self.validate()?;
        Ok(summary)
    }

    /// Enable a skill for agents, keeping existing order. Returns the agents
    /// that were newly added.
    pub fn enable(&mut self, skill: &str, agents: &[String]) -> Result<Vec<String>> {
        if let Some(bad) = agents.iter().find(|a| !is_valid_agent_name(a)) {
            return Err(ConfigError::InvalidAgentName(bad.clone()));
        }
        let entry = self
            .skill_mut(skill)
            .ok_or_else(|| ConfigError::SkillNotFound(skill.to_string()))?;
        let mut added = Vec::new();
        for agent in agents {
            if !entry.agents.contains(agent) {
                entry.agents.push(agent.clone());
                added.push(agent.clone());
            }
        }
        self.validate()?;
        Ok(added)
    }

    /// Disable a skill for agents. Returns the agents that were removed.
    pub fn disable(&mut self, skill: &str, agents: &[String]) -> Result<Vec<String>> {
        let entry = self
            .skill_mut(skill)
            .ok_or_else(|| ConfigError::SkillNotFound(skill.to_string()))?;
        let before = entry.agents.clone();
        entry.agents.retain(|a| !agents.contains(a));
        Ok(before
            .into_iter()
            .filter(|a| !entry.agents.contains(a))
            .collect())
    }

    fn skill_mut(&mut self, name: &str) -> Option<&mut SkillConfig> {
        self.repos
            .iter_mut()
            .find_map(|r| r.skills.iter_mut().find(|s| s.name == name))
    }

    fn remove_skill(&mut self, name: &str) {
        for repo in &mut self.repos {
            repo.skills.retain(|s| s.name != name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str, location: &str, agents: &[&str]) -> SkillConfig {
        SkillConfig {
            name: name.to_string(),
            location: location.to_string(),
            agents: agents.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    fn request(
        repo: &str,
        rev: &str,
        skill: Option<SkillConfig>,
        reinstall: bool,
    ) -> InstallRequest {
        InstallRequest {
            repo: repo.to_string(),
            rev: rev.to_string(),
            skill,
            reinstall,
        }
    }

    #[test]
    fn install_adds_repo_and_skill() {
        let mut config = Config::default();
        let summary = config
            .install(request(
                "https://example.com/repo",
                "v1",
                Some(skill("foo", "foo", &["codex"])),
                false,
            ))
            .unwrap();
        assert!(summary.repo_added);
        assert!(summary.skill_added);
        assert_eq!(config.repos.len(), 1);
        assert_eq!(config.repos[0].skills[0].agents, vec!["codex"]);
    }

    #[test]
    fn install_new_rev_clears_resolution() {
        let mut config = Config::default();
        config
            .install(request("https://example.com/repo", "v1", None, false))
            .unwrap();
        config.repos[0].resolved_sha = Some("abcdef0".to_string());

        let summary = config
            .install(request("https://example.com/repo", "v2", None, false))
            .unwrap();
        assert!(summary.rev_changed);
        assert_eq!(config.repos[0].rev, "v2");
        assert!(config.repos[0].resolved_sha.is_none());
        assert_eq!(config.repos.len(), 1);
    }

    #[test]
    fn install_same_rev_keeps_resolution() {
        let mut config = Config::default();
        config
            .install(request("https://example.com/repo", "v1", None, false))
            .unwrap();
        config.repos[0].resolved_sha = Some("abcdef0".to_string());
        config
            .install(request("https://example.com/repo", "v1", None, false))
            .unwrap();
        assert_eq!(config.repos[0].resolved_sha.as_deref(), Some("abcdef0"));
    }

    fn install_skill_a(repo: &str, rev: &str, reinstall: bool) -> InstallRequest {
        request(repo, rev, Some(skill("skill-a", "skill-a", &[])), reinstall)
    }

    #[test]
    fn install_duplicate_skill_requires_reinstall() {
        let mut config = Config::default();
        config
            .install(install_skill_a("https://example.com/repo-a", "v1", false))
            .unwrap();
        let err = config
            .install(install_skill_a("https://example.com/repo-b", "v1", false))
            .unwrap_err();
        assert!(matches!(err, ConfigError::SkillExists(_)));
    }

    #[test]
    fn reinstall_moves_skill_between_repos() {
        let mut config = Config::default();
        config
            .install(install_skill_a("https://example.com/repo-a", "v1", false))
            .unwrap();
        config
            .install(request("https://example.com/repo-b", "v1", None, false))
            .unwrap();

        let summary = config
            .install(install_skill_a("https://example.com/repo-b", "v2", true))
            .unwrap();
        assert!(summary.skill_replaced);

        let repo_a = config.repo("https://example.com/repo-a").unwrap();
        let repo_b = config.repo("https://example.com/repo-b").unwrap();
        assert!(repo_a.skills.is_empty());
        assert_eq!(repo_b.skills[0].name, "skill-a");
        assert_eq!(repo_b.rev, "v2");
    }

    #[test]
    fn install_identical_skill_is_noop() {
        let mut config = Config::default();
        let s = skill("foo", "foo", &["codex"]);
        config
            .install(request("r", "v1", Some(s.clone()), false))
            .unwrap();
        let summary = config.install(request("r", "v1", Some(s), false)).unwrap();
        assert_eq!(summary, InstallSummary::default());
    }

    #[test]
    fn enable_and_disable_agents() {
        let mut config = Config::default();
        config
            .install(request("r", "v1", Some(skill("foo", "foo", &["codex"])), false))
            .unwrap();

        let added = config
            .enable("foo", &["codex".to_string(), "claude".to_string()])
            .unwrap();
        assert_eq!(added, vec!["claude"]);
        assert_eq!(config.repos[0].skills[0].agents, vec!["codex", "claude"]);

        let removed = config.disable("foo", &["codex".to_string()]).unwrap();
        assert_eq!(removed, vec!["codex"]);
        assert_eq!(config.repos[0].skills[0].agents, vec!["claude"]);
    }

    #[test]
    fn enable_unknown_skill_fails() {
        let mut config = Config::default();
        assert!(matches!(
            config.enable("missing", &["codex".to_string()]),
            Err(ConfigError::SkillNotFound(_))
        ));
    }

    #[test]
    fn enable_rejects_invalid_agent_name() {
        let mut config = Config::default();
        config
            .install(request("r", "v1", Some(skill("foo", "foo", &[])), false))
            .unwrap();
        assert!(matches!(
            config.enable("foo", &["../evil".to_string()]),
            Err(ConfigError::InvalidAgentName(_))
        ));
    }
}
