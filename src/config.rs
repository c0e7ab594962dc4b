use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::UnitSelection;
use crate::error::{Result, SubstrateError};
use crate::transport::{CloneMethod, resolve_remote_url};

pub const CONFIG_FILE: &str = "substrate.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub identity: PersonConfig,
    #[serde(default)]
    pub partner: PersonConfig,
    #[serde(default)]
    pub substrate: StoreConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub pull: PullConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl Config {
    /// Resolve configuration for `workspace`.
    ///
    /// An explicit path (flag or `SUBSTRATE_CONFIG`) is the only file read;
    /// otherwise the global file is patched by the workspace file. Environment
    /// overrides apply last.
    pub fn load(explicit_path: Option<&Path>, workspace: &Path) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| env_string("SUBSTRATE_CONFIG").map(PathBuf::from));

        if let Some(path) = explicit {
            let patch = Self::load_patch(&path)?.ok_or_else(|| {
                SubstrateError::Config(format!("config file not found: {}", path.display()))
            })?;
            config.merge_patch(patch);
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_patch(&Self::project_path(workspace))? {
                config.merge_patch(project);
            }
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    #[must_use]
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("substrate").join(CONFIG_FILE))
    }

    #[must_use]
    pub fn project_path(workspace: &Path) -> PathBuf {
        workspace.join(CONFIG_FILE)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        match Self::global_path() {
            Some(path) => Self::load_patch(&path),
            None => Ok(None),
        }
    }

    /// Read one config file. `.toml` files are parsed as TOML, anything else
    /// as YAML.
    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| SubstrateError::Config(format!("read config {}: {err}", path.display())))?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let patch = if is_toml {
            toml::from_str(&raw)
                .map_err(|err| SubstrateError::Config(format!("parse config {}: {err}", path.display())))?
        } else if raw.trim().is_empty() {
            ConfigPatch::default()
        } else {
            serde_yaml::from_str(&raw)
                .map_err(|err| SubstrateError::Config(format!("parse config {}: {err}", path.display())))?
        };
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.identity {
            self.identity.merge(patch);
        }
        if let Some(patch) = patch.partner {
            self.partner.merge(patch);
        }
        if let Some(patch) = patch.substrate {
            self.substrate.merge(patch);
        }
        if let Some(patch) = patch.export {
            self.export.merge(patch);
        }
        if let Some(patch) = patch.pull {
            self.pull.merge(patch);
        }
        if let Some(patch) = patch.state {
            self.state.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource(lookup);

        if let Some(value) = env.string("SUBSTRATE_IDENTITY") {
            self.identity.name = value;
        }
        if let Some(value) = env.string("SUBSTRATE_PARTNER") {
            self.partner.name = value;
        }
        if let Some(value) = env.string("SUBSTRATE_REPO") {
            self.substrate.repo = value;
        }
        if let Some(value) = env.string("SUBSTRATE_BRANCH") {
            self.substrate.branch = value;
        }
        if let Some(value) = env.string("SUBSTRATE_CACHE_DIR") {
            self.substrate.cache_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = env.u64("SUBSTRATE_TIMEOUT_SECS")? {
            self.substrate.timeout_secs = value;
        }

        if let Some(values) = env.list("SUBSTRATE_EXPORT_SKILLS") {
            self.export.skills = values;
        }
        if let Some(values) = env.list("SUBSTRATE_EXPORT_EXCLUDE") {
            self.export.exclude = merge_unique(values, &self.export.exclude);
        }

        if let Some(value) = env.string("SUBSTRATE_INSTALL_DIR") {
            self.pull.install_dir = PathBuf::from(value);
        }
        if let Some(value) = env.bool("SUBSTRATE_BACKUP_EXISTING") {
            self.pull.backup_existing = value;
        }

        Ok(())
    }

    /// Check the keys every sync operation needs.
    pub fn validate(&self) -> Result<()> {
        if self.identity.name.trim().is_empty() {
            return Err(SubstrateError::MissingConfig("identity.name".to_string()));
        }
        if self.partner.name.trim().is_empty() {
            return Err(SubstrateError::MissingConfig("partner.name".to_string()));
        }
        if self.substrate.repo.trim().is_empty() {
            return Err(SubstrateError::MissingConfig("substrate.repo".to_string()));
        }
        if self.identity.name == self.partner.name {
            return Err(SubstrateError::Config(
                "identity.name and partner.name must differ".to_string(),
            ));
        }
        if self.substrate.branch.trim().is_empty() {
            return Err(SubstrateError::Config("substrate.branch is empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn remote_url(&self) -> String {
        resolve_remote_url(&self.substrate.repo, self.substrate.clone_method)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.substrate.timeout_secs)
    }

    #[must_use]
    pub fn install_dir(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.pull.install_dir)
    }

    #[must_use]
    pub fn state_dir(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.state.dir)
    }

    #[must_use]
    pub fn backup_dir(&self, workspace: &Path) -> PathBuf {
        self.pull.backup_dir.as_ref().map_or_else(
            || self.state_dir(workspace).join("backups"),
            |dir| workspace.join(dir),
        )
    }

    /// Root of the store working copies; never inside a workspace.
    #[must_use]
    pub fn cache_root(&self) -> PathBuf {
        self.substrate.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("substrate")
        })
    }

    /// Short stable key for a (workspace, remote) pair.
    #[must_use]
    pub fn workspace_key(&self, workspace: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(workspace.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.remote_url().as_bytes());
        let digest = hex::encode(hasher.finalize());
        let stem = workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());
        let stem: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .take(32)
            .collect();
        format!("{stem}-{}", &digest[..12])
    }

    #[must_use]
    pub fn store_dir(&self, workspace: &Path) -> PathBuf {
        self.cache_root().join(self.workspace_key(workspace)).join("store")
    }

    #[must_use]
    pub fn lock_path(&self, workspace: &Path) -> PathBuf {
        self.cache_root()
            .join(format!("{}.lock", self.workspace_key(workspace)))
    }

    /// Which units to push: explicit names win over the configured list,
    /// which wins over auto-detection.
    #[must_use]
    pub fn export_selection(&self, explicit: &[String]) -> UnitSelection {
        let explicit = if explicit.is_empty() {
            self.export.skills.clone()
        } else {
            explicit.to_vec()
        };
        UnitSelection {
            explicit,
            exclude: self.export.exclude.clone(),
            auto_detect: self.export.auto_detect,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl PersonConfig {
    fn merge(&mut self, patch: PersonPatch) {
        if let Some(value) = patch.name {
            self.name = value;
        }
        if let Some(value) = patch.handle {
            self.handle = Some(value);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub clone_method: CloneMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_branch() -> String {
    "main".to_string()
}

const fn default_timeout_secs() -> u64 {
    120
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            branch: default_branch(),
            clone_method: CloneMethod::Https,
            cache_dir: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl StoreConfig {
    fn merge(&mut self, patch: StorePatch) {
        if let Some(value) = patch.repo {
            self.repo = value;
        }
        if let Some(value) = patch.branch {
            self.branch = value;
        }
        if let Some(value) = patch.clone_method {
            self.clone_method = value;
        }
        if let Some(value) = patch.cache_dir {
            self.cache_dir = Some(value);
        }
        if let Some(value) = patch.timeout_secs {
            self.timeout_secs = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportConfig {
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_detect: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            skills: Vec::new(),
            auto_detect: true,
            exclude: vec!["substrate".to_string()],
        }
    }
}

impl ExportConfig {
    fn merge(&mut self, patch: ExportPatch) {
        if let Some(values) = patch.skills {
            self.skills = values;
        }
        if let Some(value) = patch.auto_detect {
            self.auto_detect = value;
        }
        if let Some(values) = patch.exclude {
            self.exclude = merge_unique(values, &self.exclude);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullConfig {
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    #[serde(default = "default_true")]
    pub backup_existing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("Skills")
}

const fn default_true() -> bool {
    true
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            backup_existing: true,
            backup_dir: None,
        }
    }
}

impl PullConfig {
    fn merge(&mut self, patch: PullPatch) {
        if let Some(value) = patch.install_dir {
            self.install_dir = value;
        }
        if let Some(value) = patch.backup_existing {
            self.backup_existing = value;
        }
        if let Some(value) = patch.backup_dir {
            self.backup_dir = Some(value);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("data/substrate")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

impl StateConfig {
    fn merge(&mut self, patch: StatePatch) {
        if let Some(value) = patch.dir {
            self.dir = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub identity: Option<PersonPatch>,
    pub partner: Option<PersonPatch>,
    pub substrate: Option<StorePatch>,
    pub export: Option<ExportPatch>,
    pub pull: Option<PullPatch>,
    pub state: Option<StatePatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PersonPatch {
    pub name: Option<String>,
    pub handle: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StorePatch {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub clone_method: Option<CloneMethod>,
    pub cache_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ExportPatch {
    pub skills: Option<Vec<String>>,
    pub auto_detect: Option<bool>,
    pub exclude: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PullPatch {
    pub install_dir: Option<PathBuf>,
    pub backup_existing: Option<bool>,
    pub backup_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StatePatch {
    pub dir: Option<PathBuf>,
}

fn merge_unique(values: Vec<String>, existing: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values.into_iter().chain(existing.iter().cloned()) {
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    out
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

struct EnvSource<F>(F);

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.is_empty())
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.string(key).map(|value| {
            matches!(
                value.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn u64(&self, key: &str) -> Result<Option<u64>> {
        match self.string(key) {
            Some(value) => value.parse::<u64>().map(Some).map_err(|err| {
                SubstrateError::Config(format!("invalid {key} value {value}: {err}"))
            }),
            None => Ok(None),
        }
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.string(key).map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}
