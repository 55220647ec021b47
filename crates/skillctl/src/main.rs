//! skillctl - manage agent skills declared in `.agent-skills.yaml`.
//!
//! Edits the config document and drives sync/update passes of the
//! reconciliation engine.

mod render;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Args, Parser, Subcommand};
use eyre::{bail, eyre, Result, WrapErr};
use skills_core::config::DEFAULT_CONFIG_FILE;
use skills_core::{Config, InstallRequest, PassStatus, SkillConfig, SyncMode, UpdateScope};
use skillsync::git::{Git, DEFAULT_GIT_TIMEOUT};
use skillsync::locks::RepoLocks;
use skillsync::{
    collect_garbage, project_root_of, StoreManager, SyncOptions, SyncOrchestrator, DEFAULT_JOBS,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

/// Reconcile agent skills with their source repositories.
#[derive(Parser)]
#[command(name = "skillctl", version)]
struct Cli {
    /// Config file (default: ./.agent-skills.yaml)
    #[arg(short, long, global = true, env = "AGENT_SKILLS_CONFIG")]
    config: Option<PathBuf>,

    /// Log engine decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by every command that runs a pass.
#[derive(Args, Debug)]
struct PassArgs {
    /// Replace files or foreign links occupying a link path
    #[arg(long)]
    force: bool,

    /// Repositories processed concurrently
    #[arg(long, env = "AGENT_SKILLS_JOBS", default_value_t = DEFAULT_JOBS)]
    jobs: usize,

    /// Timeout for each git invocation, in seconds
    #[arg(long, env = "AGENT_SKILLS_GIT_TIMEOUT", default_value_t = DEFAULT_GIT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show configured repos and skills
    List,

    /// Add a repo (and optionally one of its skills) to the config
    Install {
        /// Repository URL or local path
        repo: String,

        /// Tag, branch or commit to track
        #[arg(long)]
        rev: String,

        /// Skill name (requires --location)
        #[arg(long, requires = "location")]
        skill: Option<String>,

        /// Skill directory inside the repo (requires --skill)
        #[arg(long, requires = "skill")]
        location: Option<String>,

        /// Agent to enable the skill for (repeatable)
        #[arg(short = 'a', long = "agent")]
        agents: Vec<String>,

        /// Replace a skill of the same name wherever it is configured
        #[arg(long)]
        reinstall: bool,

        /// Run a sync pass afterwards
        #[arg(long)]
        sync: bool,

        #[command(flatten)]
        pass: PassArgs,
    },

    /// Enable a skill for agents
    Enable {
        skill: String,

        #[arg(short = 'a', long = "agent", required = true)]
        agents: Vec<String>,
    },

    /// Disable a skill for agents
    Disable {
        skill: String,

        #[arg(short = 'a', long = "agent", required = true)]
        agents: Vec<String>,
    },

    /// Materialize recorded revisions and align agent links
    Sync {
        #[command(flatten)]
        pass: PassArgs,
    },

    /// Re-resolve revisions, then sync
    Update {
        /// Only this repo (repeatable)
        #[arg(long = "repo")]
        repos: Vec<String>,

        /// Only the repo owning this skill (repeatable)
        #[arg(long = "skill")]
        skills: Vec<String>,

        #[command(flatten)]
        pass: PassArgs,
    },

    /// Remove store entries no repo refers to
    Gc,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    };
    drop(runtime);
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    match cli.command {
        Command::Init { force } => {
            Config::init(&path, force)
                .wrap_err_with(|| format!("failed to initialize {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(0)
        }
        Command::List => {
            render::print_config(&load(&path)?);
            Ok(0)
        }
        Command::Install {
            repo,
            rev,
            skill,
            location,
            agents,
            reinstall,
            sync,
            pass,
        } => {
            let mut config = load(&path)?;
            let skill = match (skill, location) {
                (Some(name), Some(location)) => Some(SkillConfig {
                    name,
                    location,
                    agents,
                }),
                (None, None) if agents.is_empty() => None,
                (None, None) => bail!("--agent requires --skill and --location"),
                _ => bail!("--skill and --location must be given together"),
            };
            let summary = config.install(InstallRequest {
                repo: repo.clone(),
                rev,
                skill,
                reinstall,
            })?;
            save(&config, &path)?;
            render::print_install(&repo, &summary);

            if sync {
                run_pass(&path, &config, SyncMode::Sync, &pass).await
            } else {
                Ok(0)
            }
        }
        Command::Enable { skill, agents } => {
            let mut config = load(&path)?;
            let added = config.enable(&skill, &agents)?;
            save(&config, &path)?;
            render::print_agents_changed(&skill, "enabled", &added);
            Ok(0)
        }
        Command::Disable { skill, agents } => {
            let mut config = load(&path)?;
            let removed = config.disable(&skill, &agents)?;
            save(&config, &path)?;
            render::print_agents_changed(&skill, "disabled", &removed);
            Ok(0)
        }
        Command::Sync { pass } => {
            let config = load(&path)?;
            run_pass(&path, &config, SyncMode::Sync, &pass).await
        }
        Command::Update {
            repos,
            skills,
            pass,
        } => {
            let config = load(&path)?;
            let scope = update_scope(&config, repos, skills)?;
            run_pass(&path, &config, SyncMode::Update(scope), &pass).await
        }
        Command::Gc => {
            let config = load(&path)?;
            let root = project_root_of(&path);
            let store =
                StoreManager::new(config.store_root(&root), Git::default(), RepoLocks::new());
            let report = collect_garbage(&store, &config)
                .await
                .wrap_err("store cleanup failed")?;
            render::print_gc(&report);
            Ok(0)
        }
    }
}

fn load(path: &Path) -> Result<Config> {
    Config::load(path).wrap_err_with(|| format!("failed to load {}", path.display()))
}

fn save(config: &Config, path: &Path) -> Result<()> {
    config
        .save(path)
        .wrap_err_with(|| format!("failed to save {}", path.display()))
}

/// Build the update scope, rejecting names the config does not know.
fn update_scope(config: &Config, repos: Vec<String>, skills: Vec<String>) -> Result<UpdateScope> {
    if repos.is_empty() && skills.is_empty() {
        return Ok(UpdateScope::All);
    }
    if let Some(repo) = repos.iter().find(|r| config.repo(r).is_none()) {
        return Err(eyre!("unknown repo: {}", repo));
    }
    if let Some(skill) = skills.iter().find(|s| config.skill(s).is_none()) {
        return Err(eyre!("unknown skill: {}", skill));
    }
    Ok(UpdateScope::Only { repos, skills })
}

async fn run_pass(path: &Path, config: &Config, mode: SyncMode, pass: &PassArgs) -> Result<i32> {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling pass");
            token.cancel();
        }
    });

    let options = SyncOptions {
        force: pass.force,
        jobs: pass.jobs,
        git_timeout: Duration::from_secs(pass.timeout_secs),
        cancel,
        ..Default::default()
    };
    let report = SyncOrchestrator::new(path, options)
        .run(config, &mode)
        .await?;

    if pass.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render::print_report(&report);
    }
    Ok(exit_code(report.status))
}

/// Partial success exits 2 so scripts can tell it from total failure.
fn exit_code(status: PassStatus) -> i32 {
    match status {
        PassStatus::Succeeded => 0,
        PassStatus::Partial => 2,
        PassStatus::Failed => 1,
    }
}
