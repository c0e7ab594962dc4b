//! Workspace scanning: which directories count as content units.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// File whose presence marks a directory as a content unit.
pub const DESCRIPTOR_FILE: &str = "SKILL.md";

static UNIT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("static regex")
});

/// A named, self-contained directory of files carrying a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentUnit {
    pub name: String,
    pub path: PathBuf,
    pub descriptor: Descriptor,
    pub has_scripts: bool,
}

/// Front matter of a unit's `SKILL.md`. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ContentUnit {
    /// Capability check: returns a unit when `path` is a directory with a
    /// valid name and a descriptor file, `None` otherwise.
    #[must_use]
    pub fn from_dir(path: &Path) -> Option<Self> {
        if !path.is_dir() {
            return None;
        }
        let name = path.file_name()?.to_str()?.to_string();
        if !is_valid_unit_name(&name) {
            return None;
        }
        let descriptor_path = path.join(DESCRIPTOR_FILE);
        if !descriptor_path.is_file() {
            return None;
        }
        let descriptor = std::fs::read_to_string(&descriptor_path)
            .map(|raw| parse_descriptor(&raw))
            .unwrap_or_default();
        let scripts = path.join("scripts");
        let has_scripts = std::fs::read_dir(&scripts)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        Some(Self {
            name,
            path: path.to_path_buf(),
            descriptor,
            has_scripts,
        })
    }

    /// Version from the descriptor, defaulting to `1.0.0`.
    #[must_use]
    pub fn version(&self) -> String {
        self.descriptor
            .version
            .clone()
            .unwrap_or_else(|| "1.0.0".to_string())
    }
}

/// Unit names double as directory names in the shared store and as backup id
/// prefixes, so they must be a single safe path segment.
#[must_use]
pub fn is_valid_unit_name(name: &str) -> bool {
    UNIT_NAME.is_match(name) && name != "." && name != ".."
}

/// List the content units directly under `units_dir`, sorted by name.
///
/// A missing directory yields an empty list. Discovery has no side effects.
pub fn discover_units(units_dir: &Path) -> Result<Vec<ContentUnit>> {
    let entries = match std::fs::read_dir(units_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %units_dir.display(), "units directory missing");
            return Ok(Vec::new());
        }
        Err(err) => return Err(err.into()),
    };

    let mut units = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        match ContentUnit::from_dir(&path) {
            Some(unit) => units.push(unit),
            None if path.is_dir() => {
                debug!(path = %path.display(), "directory is not a content unit");
            }
            None => {}
        }
    }
    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(units)
}

/// Which units an operation should act on.
#[derive(Debug, Clone, Default)]
pub struct UnitSelection {
    /// Explicit names. When non-empty, only these are considered.
    pub explicit: Vec<String>,
    /// Names or glob patterns to leave out.
    pub exclude: Vec<String>,
    /// Whether to take every discovered unit when `explicit` is empty.
    pub auto_detect: bool,
}

/// Result of applying a [`UnitSelection`] to a set of candidates.
#[derive(Debug, Clone)]
pub struct Selected<T> {
    pub chosen: Vec<T>,
    /// Explicitly requested names that were not among the candidates.
    pub missing: Vec<String>,
}

impl UnitSelection {
    #[must_use]
    pub fn explicit(names: Vec<String>) -> Self {
        Self {
            explicit: names,
            exclude: Vec::new(),
            auto_detect: false,
        }
    }

    /// Whether `name` is excluded, either verbatim or by glob pattern.
    #[must_use]
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|pattern| {
            pattern == name
                || glob::Pattern::new(pattern)
                    .map(|p| p.matches(name))
                    .unwrap_or(false)
        })
    }

    /// Apply the selection to `candidates`, keyed by `name_of`.
    ///
    /// Explicitly named units are kept even if they match an exclusion; the
    /// exclusion list only prunes auto-detected sets.
    pub fn apply<T, F>(&self, candidates: Vec<T>, name_of: F) -> Selected<T>
    where
        F: Fn(&T) -> &str,
    {
        if !self.explicit.is_empty() {
            let missing = self
                .explicit
                .iter()
                .filter(|wanted| !candidates.iter().any(|c| name_of(c) == wanted.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            for name in &missing {
                warn!(unit = %name, "requested unit not found");
            }
            let chosen = candidates
                .into_iter()
                .filter(|c| self.explicit.iter().any(|wanted| wanted == name_of(c)))
                .collect();
            return Selected { chosen, missing };
        }
        if !self.auto_detect {
            return Selected {
                chosen: Vec::new(),
                missing: Vec::new(),
            };
        }
        let chosen = candidates
            .into_iter()
            .filter(|c| !self.is_excluded(name_of(c)))
            .collect();
        Selected {
            chosen,
            missing: Vec::new(),
        }
    }
}

fn parse_descriptor(raw: &str) -> Descriptor {
    let mut lines = raw.lines();
    if lines.next().map(str::trim) != Some("---") {
        return Descriptor::default();
    }
    let mut front = String::new();
    for line in lines {
        if line.trim() == "---" {
            return serde_yaml::from_str(&front).unwrap_or_default();
        }
        front.push_str(line);
        front.push('\n');
    }
    Descriptor::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_unit(root: &Path, name: &str, descriptor: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DESCRIPTOR_FILE), descriptor).unwrap();
        dir
    }

    #[test]
    fn from_dir_requires_descriptor() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        assert!(ContentUnit::from_dir(&plain).is_none());

        let unit = make_unit(temp.path(), "alpha", "# alpha");
        let found = ContentUnit::from_dir(&unit).unwrap();
        assert_eq!(found.name, "alpha");
        assert!(!found.has_scripts);
    }

    #[test]
    fn from_dir_reads_front_matter() {
        let temp = TempDir::new().unwrap();
        let unit = make_unit(
            temp.path(),
            "beta",
            "---\nname: Beta Skill\nversion: 2.1.0\n---\n# body\n",
        );
        std::fs::create_dir_all(unit.join("scripts")).unwrap();
        std::fs::write(unit.join("scripts/run.py"), "print()").unwrap();

        let found = ContentUnit::from_dir(&unit).unwrap();
        assert_eq!(found.descriptor.name.as_deref(), Some("Beta Skill"));
        assert_eq!(found.version(), "2.1.0");
        assert!(found.has_scripts);
    }

    #[test]
    fn malformed_front_matter_is_ignored() {
        let parsed = parse_descriptor("---\nname: [unclosed\n---\n");
        assert_eq!(parsed, Descriptor::default());
        assert_eq!(parse_descriptor("no front matter"), Descriptor::default());
    }

    #[test]
    fn discover_units_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        make_unit(temp.path(), "zeta", "z");
        make_unit(temp.path(), "alpha", "a");
        make_unit(temp.path(), ".backups", "hidden");
        std::fs::create_dir_all(temp.path().join("notes")).unwrap();
        std::fs::write(temp.path().join("README.md"), "x").unwrap();

        let names: Vec<_> = discover_units(temp.path())
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn discover_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(discover_units(&temp.path().join("Skills")).unwrap().is_empty());
    }

    #[test]
    fn unit_names_are_single_segments() {
        assert!(is_valid_unit_name("my-skill_v2.1"));
        assert!(!is_valid_unit_name(".."));
        assert!(!is_valid_unit_name("a/b"));
        assert!(!is_valid_unit_name(".hidden"));
        assert!(!is_valid_unit_name(""));
    }

    #[test]
    fn selection_explicit_reports_missing() {
        let selection = UnitSelection::explicit(vec!["a".into(), "missing".into()]);
        let picked = selection.apply(vec!["a".to_string(), "b".to_string()], String::as_str);
        assert_eq!(picked.chosen, vec!["a"]);
        assert_eq!(picked.missing, vec!["missing"]);
    }

    #[test]
    fn selection_auto_applies_exclusions() {
        let selection = UnitSelection {
            explicit: Vec::new(),
            exclude: vec!["substrate".into(), "tmp-*".into()],
            auto_detect: true,
        };
        let picked = selection.apply(
            vec![
                "substrate".to_string(),
                "tmp-scratch".to_string(),
                "keep".to_string(),
            ],
            String::as_str,
        );
        assert_eq!(picked.chosen, vec!["keep"]);
    }

    #[test]
    fn selection_without_auto_detect_is_empty() {
        let selection = UnitSelection::default();
        let picked = selection.apply(vec!["a".to_string()], String::as_str);
        assert!(picked.chosen.is_empty());
    }

    #[test]
    fn selection_works_on_units_without_default() {
        let temp = TempDir::new().unwrap();
        make_unit(temp.path(), "alpha", "---\nname: alpha\n---\n");
        let units = discover_units(temp.path()).unwrap();

        let off = UnitSelection::default().apply(units.clone(), |u| u.name.as_str());
        assert!(off.chosen.is_empty());
        assert!(off.missing.is_empty());

        let auto = UnitSelection {
            auto_detect: true,
            ..UnitSelection::default()
        }
        .apply(units, |u| u.name.as_str());
        assert_eq!(auto.chosen.len(), 1);
        assert_eq!(auto.chosen[0].name, "alpha");
    }
}
