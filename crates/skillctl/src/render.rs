//! Output rendering for skillctl.
//!
//! Formats config listings and pass reports for terminal display.

use skills_core::{Config, InstallSummary, LinkAction, PassStatus, RepoState, SyncReport};
use skillsync::GcReport;

/// Print configured repos and their skills.
pub fn print_config(config: &Config) {
    if config.repos.is_empty() {
        println!("No repos configured.");
        return;
    }

    for repo in &config.repos {
        let sha = repo
            .resolved_sha
            .as_deref()
            .map(short_sha)
            .unwrap_or("unresolved");
        println!("{}", repo.repo);
        println!("  Rev:      {} ({})", repo.rev, sha);
        if repo.skills.is_empty() {
            println!("  Skills:   -");
            continue;
        }
        println!("  Skills:");
        for skill in &repo.skills {
            let agents = if skill.agents.is_empty() {
                "-".to_string()
            } else {
                skill.agents.join(", ")
            };
            println!(
                "    {:<24}  {:<32}  {}",
                truncate(&skill.name, 24),
                truncate(&skill.location, 32),
                agents
            );
        }
    }

    println!();
    let skills: usize = config.repos.iter().map(|r| r.skills.len()).sum();
    println!("{} repo(s), {} skill(s)", config.repos.len(), skills);
}

/// Print what an install edit changed.
pub fn print_install(repo: &str, summary: &InstallSummary) {
    if summary.repo_added {
        println!("Added repo {}", repo);
    } else if summary.rev_changed {
        println!("Updated rev of {} (resolution cleared)", repo);
    }
    if summary.skill_replaced {
        println!("Replaced existing skill");
    } else if summary.skill_added {
        println!("Added skill");
    }
    if *summary == InstallSummary::default() {
        println!("Nothing to change for {}", repo);
    }
}

pub fn print_agents_changed(skill: &str, verb: &str, agents: &[String]) {
    if agents.is_empty() {
        println!("{}: no change", skill);
    } else {
        println!("{}: {} for {}", skill, verb, agents.join(", "));
    }
    println!("Run `skillctl sync` to apply.");
}

/// Print an itemized pass report.
pub fn print_report(report: &SyncReport) {
    for repo in &report.repos {
        let state = match repo.state {
            RepoState::Synced => "SYNCED",
            RepoState::Skipped => "SKIPPED",
            RepoState::Failed => "FAILED",
        };
        let sha = repo.resolved_sha.as_deref().map(short_sha).unwrap_or("-");
        println!("{:<8}  {}  {} @ {}", state, sha, repo.repo, repo.rev);
        if let Some(ref previous) = repo.previous_sha {
            if repo.sha_changed() {
                println!("          was {}", short_sha(previous));
            }
        }
        if let Some(ref e) = repo.error {
            println!("          error: {}", e);
        }
        for skill in &repo.skills {
            match (&skill.error, &skill.path) {
                (Some(e), _) => println!("    x {:<24}  {}", skill.name, e),
                (None, Some(_)) => println!("    ok {:<23}  {}", skill.name, skill.location),
                (None, None) => println!("    - {:<24}  not processed", skill.name),
            }
        }
    }

    if !report.links.is_empty() {
        println!();
        println!("Links:");
        for change in &report.links {
            println!("  {:<10}  {}", format_action(change.action), change.path.display());
        }
    }
    if !report.link_errors.is_empty() {
        println!();
        println!("Link errors:");
        for failure in &report.link_errors {
            println!("  {}", failure.error);
        }
    }

    println!();
    let duration = report.finished_at - report.started_at;
    println!(
        "{} {}: {} error(s), {} link change(s) in {:.1}s{}",
        report.mode,
        format_status(report.status),
        report.failure_count(),
        report.links.len(),
        duration.num_milliseconds() as f64 / 1000.0,
        if report.config_written {
            ", config updated"
        } else {
            ""
        }
    );
}

/// Print what gc removed.
pub fn print_gc(report: &GcReport) {
    if report.removed.is_empty() {
        println!("Nothing to remove.");
        return;
    }
    for path in &report.removed {
        println!("removed {}", path.display());
    }
    println!();
    println!("{} path(s) removed", report.removed.len());
}

fn format_status(status: PassStatus) -> &'static str {
    match status {
        PassStatus::Succeeded => "SUCCEEDED",
        PassStatus::Partial => "PARTIAL",
        PassStatus::Failed => "FAILED",
    }
}

fn format_action(action: LinkAction) -> &'static str {
    match action {
        LinkAction::Created => "CREATED",
        LinkAction::Repointed => "REPOINTED",
        LinkAction::Removed => "REMOVED",
        LinkAction::Replaced => "REPLACED",
    }
}

fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(12)]
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sha_handles_abbreviations() {
        assert_eq!(short_sha("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_sha("abc1234"), "abc1234");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
