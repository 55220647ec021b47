//! Skill location checks against a store entry.

use skills_core::EntityError;
use std::path::{Component, Path, PathBuf};

/// Required manifest file name (exact case).
pub const MANIFEST_FILE: &str = "SKILL.md";

/// Strip a trailing `/` and a trailing manifest file name, so `foo/`,
/// `foo/SKILL.md` and `foo` all name the same skill directory.
pub fn normalize_location(location: &str) -> &str {
    let trimmed = location.trim_end_matches(['/', '\\']);
    let (parent, leaf) = match trimmed.rfind(['/', '\\']) {
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("", trimmed),
    };
    if leaf.eq_ignore_ascii_case(MANIFEST_FILE) {
        parent.trim_end_matches(['/', '\\'])
    } else {
        trimmed
    }
}

/// Validate `location` inside `entry_root` and return the skill root.
///
/// The location must stay inside the entry both lexically and after
/// resolving symlinks, and the directory must hold a `SKILL.md` file.
pub fn validate_skill(
    entry_root: &Path,
    name: &str,
    location: &str,
) -> Result<PathBuf, EntityError> {
    let invalid = |reason: &str| EntityError::InvalidSkillLocation {
        skill: name.to_string(),
        location: location.to_string(),
        reason: reason.to_string(),
    };

    let relative = lexical_relative(normalize_location(location)).map_err(invalid)?;
    let skill_root = entry_root.join(&relative);

    let missing = || EntityError::ManifestMissing {
        skill: name.to_string(),
        path: skill_root.join(MANIFEST_FILE),
    };

    let canonical_root = entry_root
        .canonicalize()
        .map_err(|_| invalid("store entry is not readable"))?;
    let canonical = match skill_root.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(missing()),
        Err(_) => return Err(invalid("location is not readable")),
    };
    if !canonical.starts_with(&canonical_root) {
        return Err(invalid("resolves outside the checkout"));
    }
    if !canonical.is_dir() {
        return Err(invalid("not a directory"));
    }

    if !has_manifest(&canonical) {
        return Err(missing());
    }
    Ok(skill_root)
}

/// Collapse `.` and `..` without touching the filesystem, rejecting paths
/// that are absolute or climb above the root.
fn lexical_relative(location: &str) -> Result<PathBuf, &'static str> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in Path::new(location).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err("escapes the checkout");
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err("must be relative"),
        }
    }
    Ok(out)
}

/// Exact-name lookup; `canonical.join("SKILL.md").exists()` would accept
/// `skill.md` on case-insensitive filesystems.
fn has_manifest(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry.file_name() == MANIFEST_FILE
            && entry.file_type().map(|t| t.is_file()).unwrap_or(false)
    })
}
