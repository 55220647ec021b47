//! Config document for the skills manager.
//!
//! One YAML file (`.agent-skills.yaml` by default) declares agents, source
//! repositories and the skills they provide. It is read at the start of every
//! operation and written back atomically (temp file + rename).

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Default config file name, relative to the project root.
pub const DEFAULT_CONFIG_FILE: &str = ".agent-skills.yaml";

/// Default checkout store, relative to the project root.
pub const DEFAULT_STORE_DIR: &str = ".agent-skills/store";

/// Root of the per-agent link trees, relative to the project root.
pub const AGENTS_ROOT: &str = ".agent-skills/agents";

/// The only schema version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("config file already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("invalid config document: {0}")]
    Parse(String),
    #[error("failed to serialize config: {0}")]
    Serialize(String),
    #[error("failed to write config file {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported config version {0} (expected {SCHEMA_VERSION})")]
    UnsupportedVersion(u32),
    #[error("expected non-empty string for '{0}'")]
    EmptyField(&'static str),
    #[error("path must be relative for '{key}': {path}")]
    NotRelative { key: &'static str, path: String },
    #[error("path cannot contain '..' for '{key}': {path}")]
    ParentTraversal { key: &'static str, path: String },
    #[error("invalid agent name: {0}")]
    InvalidAgentName(String),
    #[error("duplicate {kind}: {value}")]
    Duplicate { kind: &'static str, value: String },
    #[error("resolved_sha must be a 7-64 char hex string: {0}")]
    InvalidSha(String),
    #[error("skill not found: {0}")]
    SkillNotFound(String),
    #[error("skill already configured: {0} (use reinstall to replace it)")]
    SkillExists(String),
    #[error("{0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Per-agent settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Extra directory (relative to the project root) that receives links
    /// for this agent, e.g. `.claude/skills`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<PathBuf>,
}

/// A skill provided by a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillConfig {
    /// Leaf name of the agent links; unique across the document.
    pub name: String,
    /// Directory inside the checkout holding `SKILL.md`.
    #[serde(alias = "path")]
    pub location: String,
    /// Agents this skill is enabled for.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub agents: Vec<String>,
}

/// A version-controlled source of skills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Locator (URL or local path). Identity key.
    pub repo: String,
    /// Human revision: tag, branch, or commit.
    pub rev: String,
    /// Commit `rev` resolved to on the last successful pass. Tool-managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_sha: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub skills: Vec<SkillConfig>,
}

/// The whole config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    #[serde(default = "default_store_dir", deserialize_with = "store_dir_or_default")]
    pub store_dir: PathBuf,
    #[serde(
        default,
        deserialize_with = "deserialize_agents",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub agents: BTreeMap<String, AgentConfig>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub repos: Vec<RepoConfig>,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_DIR)
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn store_dir_or_default<'de, D>(deserializer: D) -> std::result::Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<PathBuf>::deserialize(deserializer)?.unwrap_or_else(default_store_dir))
}

// `codex:` with no body is a valid agent declaration.
fn deserialize_agents<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, AgentConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Option<AgentConfig>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, agent)| (name, agent.unwrap_or_default()))
        .collect())
}

impl Default for Config {
    /// The scaffolded document written by `init`.
    fn default() -> Self {
        let agent = |dir: &str| AgentConfig {
            target_dir: Some(PathBuf::from(dir)),
        };
        let mut agents = BTreeMap::new();
        agents.insert("codex".to_string(), agent(".codex/skills"));
        agents.insert("claude".to_string(), agent(".claude/skills"));
        agents.insert("opencode".to_string(), agent(".opencode/skills"));
        Self {
            version: SCHEMA_VERSION,
            store_dir: default_store_dir(),
            agents,
            repos: Vec::new(),
        }
    }
}

impl Config {
    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Serialize the document to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Validate, then atomically replace the document at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = self.to_yaml()?;
        atomic_write(path, content.as_bytes())
    }

    /// Write the default document, refusing to clobber an existing file.
    pub fn init(path: &Path, overwrite: bool) -> Result<Self> {
        if path.exists() && !overwrite {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Absolute store root for a project.
    pub fn store_root(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.store_dir)
    }

    /// Absolute agents link root for a project.
    pub fn agents_root(project_root: &Path) -> PathBuf {
        project_root.join(AGENTS_ROOT)
    }

    /// Find a repo by locator.
    pub fn repo(&self, locator: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.repo == locator)
    }

    /// Find a skill by name, returning its repo too.
    pub fn skill(&self, name: &str) -> Option<(&RepoConfig, &SkillConfig)> {
        self.repos
            .iter()
            .find_map(|r| r.skills.iter().find(|s| s.name == name).map(|s| (r, s)))
    }

    /// Check every schema rule.
    pub fn validate(&self) -> Result<()> {
        if self.version != SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        validate_relpath(&self.store_dir, "store_dir")?;

        for (name, agent) in &self.agents {
            if !is_valid_agent_name(name) {
                return Err(ConfigError::InvalidAgentName(name.clone()));
            }
            if let Some(ref dir) = agent.target_dir {
                validate_relpath(dir, "target_dir")?;
            }
        }

        let mut locators = HashSet::new();
        let mut skill_names = HashSet::new();
        for repo in &self.repos {
            if repo.repo.trim().is_empty() {
                return Err(ConfigError::EmptyField("repo"));
            }
            if repo.rev.trim().is_empty() {
                return Err(ConfigError::EmptyField("rev"));
            }
            if !locators.insert(repo.repo.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "repo URL",
                    value: repo.repo.clone(),
                });
            }
            if let Some(ref sha) = repo.resolved_sha {
                if !is_hex_id(sha, 7, 64) {
                    return Err(ConfigError::InvalidSha(sha.clone()));
                }
            }
            for skill in &repo.skills {
                skill.validate()?;
                if !skill_names.insert(skill.name.as_str()) {
                    return Err(ConfigError::Duplicate {
                        kind: "skill name",
                        value: skill.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl SkillConfig {
    /// Schema-level checks. Traversal is left to the skill validator so one
    /// bad location is reported per skill instead of rejecting the document.
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyField("skills[].name"));
        }
        if self.name.contains(['/', '\\']) || self.name.starts_with('.') {
            return Err(ConfigError::InvalidRequest(format!(
                "skill name must be a single path segment not starting with '.': {}",
                self.name
            )));
        }
        if self.location.trim().is_empty() {
            return Err(ConfigError::EmptyField("skills[].location"));
        }
        if is_absolute_like(&self.location) {
            return Err(ConfigError::NotRelative {
                key: "skills[].location",
                path: self.location.clone(),
            });
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.trim().is_empty() {
                return Err(ConfigError::EmptyField("skills[].agents[]"));
            }
            if !is_valid_agent_name(agent) {
                return Err(ConfigError::InvalidAgentName(agent.clone()));
            }
            if !seen.insert(agent.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "agent in skill",
                    value: format!("{} ({agent})", self.name),
                });
            }
        }
        Ok(())
    }
}

/// Agent names double as directory names under the agents root.
pub fn is_valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && name != "."
        && name != ".."
}

/// Hex string with a length in `min..=max`.
pub fn is_hex_id(value: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&value.len()) && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether `rev` is a complete SHA-1 or SHA-256 commit id.
pub fn is_full_commit_id(rev: &str) -> bool {
    (rev.len() == 40 || rev.len() == 64) && is_hex_id(rev, 40, 64)
}

fn is_absolute_like(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    raw.starts_with('/')
        || raw.starts_with('\\')
        || Path::new(raw).is_absolute()
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

fn validate_relpath(path: &Path, key: &'static str) -> Result<()> {
    let raw = path.to_string_lossy();
    if raw.trim().is_empty() {
        return Err(ConfigError::EmptyField(key));
    }
    if is_absolute_like(&raw) {
        return Err(ConfigError::NotRelative {
            key,
            path: raw.into_owned(),
        });
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ConfigError::ParentTraversal {
            key,
            path: raw.into_owned(),
        });
    }
    Ok(())
}

/// Replace `path` with `bytes` via a synced temp file in the same directory.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let write_err = |source| ConfigError::WriteError {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    temp.write_all(bytes).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse_err(yaml: &str) -> ConfigError {
        Config::from_yaml(yaml).unwrap_err()
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.store_dir, PathBuf::from(".agent-skills/store"));
        assert_eq!(config.agents.len(), 3);
        assert_eq!(
            config.agents["claude"].target_dir,
            Some(PathBuf::from(".claude/skills"))
        );
        assert!(config.repos.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn parse_full_document() {
        let config = Config::from_yaml(
            r"
version: 1
store_dir: .cache/store
agents:
  codex:
    target_dir: .codex/skills
  claude:
repos:
  - repo: https://example.com/skills.git
    rev: v1.0.0
    resolved_sha: 0123456789abcdef0123456789abcdef01234567
    skills:
      - name: foo
        location: skills/foo
        agents: [codex, claude]
",
        )
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from(".cache/store"));
        assert_eq!(config.agents["claude"], AgentConfig::default());
        assert_eq!(config.repos[0].skills[0].agents, vec!["codex", "claude"]);
        assert_eq!(
            config.repos[0].resolved_sha.as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );
    }

    #[test]
    fn parse_accepts_legacy_path_key_and_nulls() {
        let config = Config::from_yaml(
            r"
version: 1
store_dir:
agents:
repos:
  - repo: ./local
    rev: main
    skills:
      - name: foo
        path: foo
        agents:
",
        )
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from(DEFAULT_STORE_DIR));
        assert!(config.agents.is_empty());
        assert_eq!(config.repos[0].skills[0].location, "foo");
        assert!(config.repos[0].skills[0].agents.is_empty());
    }

    #[test]
    fn requires_version() {
        assert!(matches!(parse_err("store_dir: x\n"), ConfigError::Parse(_)));
        assert!(matches!(
            parse_err("version: 2\n"),
            ConfigError::UnsupportedVersion(2)
        ));
    }

    #[test]
    fn store_dir_must_be_relative() {
        assert!(matches!(
            parse_err("version: 1\nstore_dir: /abs/path\n"),
            ConfigError::NotRelative { .. }
        ));
        assert!(matches!(
            parse_err("version: 1\nstore_dir: ../outside\n"),
            ConfigError::ParentTraversal { .. }
        ));
    }

    #[test]
    fn invalid_agent_name() {
        assert!(matches!(
            parse_err("version: 1\nagents:\n  bad name: {}\n"),
            ConfigError::InvalidAgentName(_)
        ));
    }

    #[test]
    fn duplicate_repo_urls() {
        let err = parse_err(
            r"
version: 1
repos:
  - repo: https://example.com/repo
    rev: v1
  - repo: https://example.com/repo
    rev: v2
",
        );
        assert!(matches!(err, ConfigError::Duplicate { kind: "repo URL", .. }));
    }

    #[test]
    fn duplicate_skill_names_across_repos() {
        let err = parse_err(
            r"
version: 1
repos:
  - repo: https://example.com/repo1
    rev: v1
    skills: [{name: skill-a, location: skills/a}]
  - repo: https://example.com/repo2
    rev: v1
    skills: [{name: skill-a, location: skills/a}]
",
        );
        assert!(matches!(err, ConfigError::Duplicate { kind: "skill name", .. }));
    }

    #[test]
    fn duplicate_skill_agents() {
        let err = parse_err(
            r"
version: 1
repos:
  - repo: https://example.com/repo
    rev: v1
    skills: [{name: skill-a, location: a, agents: [codex, codex]}]
",
        );
        assert!(matches!(err, ConfigError::Duplicate { .. }));
    }

    #[test]
    fn skill_names_are_plain_segments() {
        for name in ["a/b", ".", "..", ".hidden", ".foo.tmp-x"] {
            let yaml = format!(
                "version: 1\nrepos:\n  - {{repo: r, rev: v1, \
                 skills: [{{name: '{name}', location: a}}]}}\n"
            );
            let err = parse_err(&yaml);
            assert!(matches!(err, ConfigError::InvalidRequest(_)), "{name}: {err:?}");
        }
    }

    #[test]
    fn resolved_sha_format() {
        let err = parse_err(
            "version: 1\nrepos:\n  - {repo: r, rev: v1, resolved_sha: not-a-sha}\n",
        );
        assert!(matches!(err, ConfigError::InvalidSha(_)));
    }

    #[test]
    fn absolute_skill_location_rejected_but_traversal_deferred() {
        let err = parse_err(
            "version: 1\nrepos:\n  - {repo: r, rev: v1, skills: [{name: a, location: /etc}]}\n",
        );
        assert!(matches!(err, ConfigError::NotRelative { .. }));

        let config = Config::from_yaml(
            "version: 1\nrepos:\n  - {repo: r, rev: v1, skills: [{name: a, location: ../bad}]}\n",
        )
        .unwrap();
        assert_eq!(config.repos[0].skills[0].location, "../bad");
    }

    #[test]
    fn save_and_load_preserves_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/.agent-skills.yaml");

        let mut config = Config::default();
        config.repos.push(RepoConfig {
            repo: "https://example.com/repo".to_string(),
            rev: "v1".to_string(),
            resolved_sha: None,
            skills: vec![SkillConfig {
                name: "foo".to_string(),
                location: "foo".to_string(),
                agents: vec!["codex".to_string()],
            }],
        });
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("resolved_sha"));
        assert!(raw.contains("location: foo"));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        Config::init(&path, false).unwrap();
        assert!(matches!(
            Config::init(&path, false),
            Err(ConfigError::AlreadyExists(_))
        ));
        Config::init(&path, true).unwrap();
    }

    #[test]
    fn load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(&dir.path().join("nope.yaml")),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn skill_lookup() {
        let config = Config::from_yaml(
            "version: 1\nrepos:\n  - {repo: r, rev: v1, skills: [{name: a, location: a}]}\n",
        )
        .unwrap();
        let (repo, skill) = config.skill("a").unwrap();
        assert_eq!(repo.repo, "r");
        assert_eq!(skill.location, "a");
        assert!(config.skill("b").is_none());
    }
}
