use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// Two workspaces (alice and bob) sharing one bare repository.
pub struct Pair {
    root: TempDir,
    pub remote: PathBuf,
    pub cache: PathBuf,
    pub alice: Workspace,
    pub bob: Workspace,
}

pub struct Workspace {
    pub root: PathBuf,
    pub config: PathBuf,
}

impl Pair {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let remote = root.path().join("store.git");
        let cache = root.path().join("cache");
        let alice = Workspace::create(root.path(), "alice", "bob", &remote, &cache);
        let bob = Workspace::create(root.path(), "bob", "alice", &remote, &cache);
        let pair = Self {
            root,
            remote,
            cache,
            alice,
            bob,
        };
        let init = pair.alice.robot(&["setup", "init", "--create-remote"]);
        assert_eq!(init["status"], "ok", "setup failed: {init}");
        pair
    }

    /// Commit `contents` at `rel` in the shared store from a plain clone,
    /// leaving `MANIFEST.json` untouched.
    pub fn commit_to_store(&self, rel: &str, contents: &str) {
        let checkout = self.root.path().join("hand-edit");
        let repo = git2::Repository::clone(self.remote.to_str().unwrap(), &checkout).unwrap();
        let file = checkout.join(rel);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, contents).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(rel)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = git2::Signature::now("carol", "carol@example.com").unwrap();
        let parent = repo.head().unwrap().peel_to_commit().unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "edit store", &tree, &[&parent])
            .unwrap();
        repo.find_remote("origin")
            .unwrap()
            .push(&["refs/heads/main:refs/heads/main"], None)
            .unwrap();
    }

    /// Hold the lock on the remote branch so every push to it fails until
    /// the returned file is removed.
    pub fn lock_remote_branch(&self) -> PathBuf {
        let lock = self.remote.join("refs/heads/main.lock");
        std::fs::write(&lock, "").unwrap();
        lock
    }
}

impl Workspace {
    fn create(base: &Path, me: &str, partner: &str, remote: &Path, cache: &Path) -> Self {
        let root = base.join(me);
        std::fs::create_dir_all(root.join("Skills")).unwrap();
        let config = base.join(format!("{me}.yaml"));
        std::fs::write(
            &config,
            format!(
                "identity:\n  name: {me}\npartner:\n  name: {partner}\nsubstrate:\n  repo: {}\n  cache_dir: {}\n",
                remote.display(),
                cache.display()
            ),
        )
        .unwrap();
        Self {
            root: std::fs::canonicalize(&root).unwrap(),
            config,
        }
    }

    pub fn skills(&self) -> PathBuf {
        self.root.join("Skills")
    }

    pub fn write_skill(&self, name: &str, body: &str) {
        let dir = self.skills().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {name}\ndescription: {name} skill\n---\n\n{body}\n"),
        )
        .unwrap();
    }

    pub fn read_skill(&self, name: &str) -> String {
        std::fs::read_to_string(self.skills().join(name).join("SKILL.md")).unwrap()
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("substrate").unwrap();
        cmd.env_remove("SUBSTRATE_CONFIG")
            .env_remove("SUBSTRATE_WORKSPACE")
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(&self.config)
            .arg("--workspace")
            .arg(&self.root);
        cmd
    }

    /// Run in robot mode and parse stdout, whatever the exit status.
    pub fn robot(&self, args: &[&str]) -> Value {
        self.robot_exit(args).1
    }

    /// Like [`Workspace::robot`], also returning whether the process exited
    /// with success.
    pub fn robot_exit(&self, args: &[&str]) -> (bool, Value) {
        let output = self.command().arg("--robot").args(args).output().unwrap();
        let value: Value = serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
            panic!(
                "stdout is not JSON ({err}): {}\nstderr: {}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
        });
        (output.status.success(), value)
    }
}

/// `(name, outcome)` for each unit in a run report.
pub fn outcomes(report: &Value) -> Vec<(String, String)> {
    report["data"]["units"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| {
            (
                u["name"].as_str().unwrap().to_string(),
                u["outcome"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

pub fn outcome_of(report: &Value, unit: &str) -> String {
    outcomes(report)
        .into_iter()
        .find(|(name, _)| name == unit)
        .map(|(_, outcome)| outcome)
        .unwrap_or_else(|| panic!("{unit} missing from report: {report}"))
}
