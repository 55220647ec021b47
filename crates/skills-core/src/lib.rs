pub mod config;
pub mod edit;
pub mod report;
pub mod types;

pub use config::{AgentConfig, Config, ConfigError, RepoConfig, SkillConfig};
pub use edit::{InstallRequest, InstallSummary};
pub use report::{
    LinkAction, LinkChange, LinkFailure, PassStatus, RepoOutcome, RepoState, SkillOutcome,
    SyncReport,
};
pub use types::*;
