use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use git2::build::CheckoutBuilder;
use git2::{
    Commit, Cred, CredentialType, ErrorClass, FetchOptions, IndexAddOption, PushOptions,
    RemoteCallbacks, Repository, RepositoryInitOptions, Signature,
};
use tracing::{debug, info, warn};

use crate::error::{Result, SubstrateError};

use super::{Transport, local_remote_path};

/// Shared store backed by a git remote, with a working copy in a cache dir.
#[derive(Debug, Clone)]
pub struct GitTransport {
    url: String,
    branch: String,
    store_dir: PathBuf,
    author_name: String,
    author_email: String,
    timeout: Duration,
    auth: ResolvedAuth,
}

#[derive(Debug, Clone)]
enum ResolvedAuth {
    Default,
    Token { token: String },
}

impl GitTransport {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        branch: impl Into<String>,
        store_dir: impl Into<PathBuf>,
        identity: &str,
        timeout: Duration,
    ) -> Self {
        let auth = ["SUBSTRATE_GIT_TOKEN", "GITHUB_TOKEN"]
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
            .map_or(ResolvedAuth::Default, |token| ResolvedAuth::Token { token });
        Self {
            url: url.into(),
            branch: branch.into(),
            store_dir: store_dir.into(),
            author_name: identity.to_string(),
            author_email: format!("{identity}@substrate.local"),
            timeout,
            auth,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn local_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn remote_ref(&self) -> String {
        format!("refs/remotes/origin/{}", self.branch)
    }

    fn open_or_init(&self) -> Result<Repository> {
        if self.store_dir.join(".git").exists() {
            return Ok(Repository::open(&self.store_dir)?);
        }
        std::fs::create_dir_all(&self.store_dir)?;
        debug!(path = %self.store_dir.display(), "initialising store working copy");
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(&self.branch);
        Ok(Repository::init_opts(&self.store_dir, &opts)?)
    }

    fn fetch(&self, repo: &Repository) -> Result<()> {
        let guard = TransferGuard::new(self.timeout);
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(self.callbacks(&guard));
        let mut remote = repo.find_remote("origin")?;
        remote
            .fetch(
                &["+refs/heads/*:refs/remotes/origin/*"],
                Some(&mut fetch),
                None,
            )
            .map_err(|err| guard.map_error(&self.url, &err))?;
        Ok(())
    }

    /// Point the local branch at the right commit after a fetch.
    fn reconcile(&self, repo: &Repository) -> Result<()> {
        let local_ref = self.local_ref();
        let remote_ref = self.remote_ref();
        let local = repo.refname_to_id(&local_ref).ok();
        let remote = repo.refname_to_id(&remote_ref).ok();

        match (local, remote) {
            (_, None) => debug!(branch = %self.branch, "remote branch absent; keeping local state"),
            (None, Some(remote)) => {
                repo.reference(&local_ref, remote, true, "substrate: track remote")?;
            }
            (Some(local), Some(remote)) if local == remote => {}
            (Some(local), Some(remote)) => {
                if repo.graph_descendant_of(remote, local)? {
                    repo.reference(&local_ref, remote, true, "substrate: fast-forward")?;
                } else if repo.graph_descendant_of(local, remote)? {
                    info!(branch = %self.branch, "store has an unpublished commit; keeping it");
                } else {
                    warn!(
                        branch = %self.branch,
                        local = %local,
                        remote = %remote,
                        "store copy diverged from remote; resetting to remote"
                    );
                    repo.reference(&local_ref, remote, true, "substrate: reset to remote")?;
                }
            }
        }

        repo.set_head(&local_ref)?;
        if repo.refname_to_id(&local_ref).is_ok() {
            repo.checkout_head(Some(CheckoutBuilder::new().force().remove_untracked(true)))?;
        } else {
            clear_worktree(&self.store_dir)?;
        }
        Ok(())
    }

    fn callbacks<'cb>(&self, guard: &TransferGuard) -> RemoteCallbacks<'cb> {
        let mut callbacks = RemoteCallbacks::new();

        let auth = self.auth.clone();
        let attempts = AtomicUsize::new(0);
        callbacks.credentials(move |_url, username_from_url, allowed| {
            if attempts.fetch_add(1, Ordering::SeqCst) >= 3 {
                return Err(git2::Error::from_str("authentication failed"));
            }
            match &auth {
                ResolvedAuth::Token { token }
                    if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) =>
                {
                    Cred::userpass_plaintext(username_from_url.unwrap_or("x-access-token"), token)
                }
                _ if allowed.contains(CredentialType::SSH_KEY) => {
                    Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
                }
                _ => Cred::default(),
            }
        });

        let deadline = guard.deadline;
        let expired = Arc::clone(&guard.expired);
        callbacks.transfer_progress(move |_progress| check_deadline(deadline, &expired));
        let deadline = guard.deadline;
        let expired = Arc::clone(&guard.expired);
        callbacks.sideband_progress(move |_data| check_deadline(deadline, &expired));
        callbacks
    }
}

impl Transport for GitTransport {
    fn sync_local_copy(&self) -> Result<PathBuf> {
        let repo = self.open_or_init()?;
        ensure_origin_url(&repo, &self.url)?;
        self.fetch(&repo)?;
        self.reconcile(&repo)?;
        info!(
            url = %self.url,
            branch = %self.branch,
            head = %self.head_revision(&self.store_dir).unwrap_or_else(|| "none".to_string()),
            "store copy synchronised"
        );
        Ok(self.store_dir.clone())
    }

    fn commit(&self, path: &Path, message: &str) -> Result<String> {
        let repo = Repository::open(path)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let signature = Signature::now(&self.author_name, &self.author_email)?;
        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        info!(revision = %oid, "committed store changes");
        Ok(oid.to_string())
    }

    fn publish(&self, path: &Path) -> Result<()> {
        let repo = Repository::open(path)?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("{0}:{0}", self.local_ref());

        let guard = TransferGuard::new(self.timeout);
        let rejection: RefCell<Option<String>> = RefCell::new(None);
        let mut callbacks = self.callbacks(&guard);
        callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                *rejection.borrow_mut() = Some(format!("{refname}: {status}"));
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .map_err(|err| guard.map_error(&self.url, &err))?;
        if let Some(reason) = rejection.borrow_mut().take() {
            return Err(SubstrateError::Transport(format!("push rejected: {reason}")));
        }
        info!(url = %self.url, branch = %self.branch, "published store revision");
        Ok(())
    }

    fn create_remote(&self) -> Result<()> {
        let Some(path) = local_remote_path(&self.url) else {
            return Err(SubstrateError::Transport(format!(
                "cannot create hosted remote {}; create it with your hosting service first",
                self.url
            )));
        };
        if Repository::open_bare(&path).is_ok() || Repository::open(&path).is_ok() {
            info!(path = %path.display(), "remote already exists");
            return Ok(());
        }
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).initial_head(&self.branch);
        Repository::init_opts(&path, &opts)?;
        info!(path = %path.display(), "created bare remote");
        Ok(())
    }

    fn head_revision(&self, path: &Path) -> Option<String> {
        let repo = Repository::open(path).ok()?;
        let head = repo.head().ok()?;
        head.target().map(|oid| oid.to_string())
    }

    fn has_unpublished(&self, path: &Path) -> Result<bool> {
        let Ok(repo) = Repository::open(path) else {
            return Ok(false);
        };
        let Ok(local) = repo.refname_to_id(&self.local_ref()) else {
            return Ok(false);
        };
        match repo.refname_to_id(&self.remote_ref()) {
            Err(_) => Ok(true),
            Ok(remote) if remote == local => Ok(false),
            Ok(remote) => Ok(repo.graph_descendant_of(local, remote)?),
        }
    }

    fn local_copy(&self) -> PathBuf {
        self.store_dir.clone()
    }
}

/// Bound libgit2's connect and socket reads by `timeout`. libgit2 keeps
/// these in process globals, so call this before any other thread starts.
#[allow(unsafe_code)]
pub fn set_network_timeouts(timeout: Duration) -> Result<()> {
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    // SAFETY: only called from `main`, before rayon or anything else spawns.
    unsafe {
        git2::opts::set_server_connect_timeout_in_milliseconds(millis)?;
        git2::opts::set_server_timeout_in_milliseconds(millis)?;
    }
    debug!(millis, "network timeouts set");
    Ok(())
}

/// Deadline shared by the progress callbacks of one network operation.
struct TransferGuard {
    deadline: Instant,
    expired: Arc<AtomicBool>,
}

impl TransferGuard {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            expired: Arc::new(AtomicBool::new(false)),
        }
    }

    fn map_error(&self, url: &str, err: &git2::Error) -> SubstrateError {
        if self.expired.load(Ordering::SeqCst) {
            SubstrateError::Timeout(format!("{url}: transfer exceeded deadline"))
        } else if is_network_timeout(err) {
            SubstrateError::Timeout(format!("{url}: {}", err.message()))
        } else {
            SubstrateError::Transport(format!("{url}: {}", err.message()))
        }
    }
}

/// Connect and read timeouts raised by the network layer itself, before any
/// progress callback has run.
fn is_network_timeout(err: &git2::Error) -> bool {
    err.class() == ErrorClass::Net && err.message().to_ascii_lowercase().contains("timed out")
}

fn check_deadline(deadline: Instant, expired: &AtomicBool) -> bool {
    if Instant::now() > deadline {
        expired.store(true, Ordering::SeqCst);
        return false;
    }
    true
}

fn ensure_origin_url(repo: &Repository, url: &str) -> Result<()> {
    match repo.find_remote("origin") {
        Ok(remote) => {
            if remote.url() != Some(url) {
                repo.remote_set_url("origin", url)?;
            }
        }
        Err(_) => {
            repo.remote("origin", url)?;
        }
    }
    Ok(())
}

/// Empty a working tree whose branch has no commits yet.
fn clear_worktree(root: &Path) -> Result<()> {
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn transport(remote: &Path, store: &Path, who: &str) -> GitTransport {
        GitTransport::new(
            remote.display().to_string(),
            "main",
            store,
            who,
            Duration::from_secs(30),
        )
    }

    #[test]
    fn create_remote_then_round_trip() {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        let alice = transport(&remote, &temp.path().join("alice"), "alice");
        alice.create_remote().unwrap();
        alice.create_remote().unwrap();

        let store = alice.sync_local_copy().unwrap();
        assert!(alice.head_revision(&store).is_none());
        std::fs::write(store.join("README.md"), "store").unwrap();
        let revision = alice.commit(&store, "seed").unwrap();
        alice.publish(&store).unwrap();

        let bob = transport(&remote, &temp.path().join("bob"), "bob");
        let copy = bob.sync_local_copy().unwrap();
        assert_eq!(bob.head_revision(&copy).as_deref(), Some(revision.as_str()));
        assert_eq!(std::fs::read_to_string(copy.join("README.md")).unwrap(), "store");
    }

    #[test]
    fn sync_discards_uncommitted_changes() {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        let alice = transport(&remote, &temp.path().join("alice"), "alice");
        alice.create_remote().unwrap();
        let store = alice.sync_local_copy().unwrap();
        std::fs::write(store.join("README.md"), "v1").unwrap();
        alice.commit(&store, "seed").unwrap();
        alice.publish(&store).unwrap();

        std::fs::write(store.join("README.md"), "scribble").unwrap();
        std::fs::write(store.join("stray.txt"), "x").unwrap();
        alice.sync_local_copy().unwrap();
        assert_eq!(std::fs::read_to_string(store.join("README.md")).unwrap(), "v1");
        assert!(!store.join("stray.txt").exists());
    }

    #[test]
    fn fast_forwards_to_partner_commit() {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        let alice = transport(&remote, &temp.path().join("alice"), "alice");
        let bob = transport(&remote, &temp.path().join("bob"), "bob");
        alice.create_remote().unwrap();

        let a = alice.sync_local_copy().unwrap();
        std::fs::write(a.join("one.txt"), "1").unwrap();
        alice.commit(&a, "one").unwrap();
        alice.publish(&a).unwrap();

        let b = bob.sync_local_copy().unwrap();
        std::fs::write(b.join("two.txt"), "2").unwrap();
        let second = bob.commit(&b, "two").unwrap();
        bob.publish(&b).unwrap();

        alice.sync_local_copy().unwrap();
        assert_eq!(alice.head_revision(&a).as_deref(), Some(second.as_str()));
        assert!(a.join("two.txt").exists());
    }

    #[test]
    fn stale_publish_is_rejected() {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        let alice = transport(&remote, &temp.path().join("alice"), "alice");
        let bob = transport(&remote, &temp.path().join("bob"), "bob");
        alice.create_remote().unwrap();

        let a = alice.sync_local_copy().unwrap();
        std::fs::write(a.join("base.txt"), "0").unwrap();
        alice.commit(&a, "base").unwrap();
        alice.publish(&a).unwrap();
        let b = bob.sync_local_copy().unwrap();

        std::fs::write(a.join("a.txt"), "a").unwrap();
        alice.commit(&a, "a").unwrap();
        alice.publish(&a).unwrap();

        std::fs::write(b.join("b.txt"), "b").unwrap();
        bob.commit(&b, "b").unwrap();
        assert!(bob.publish(&b).is_err());
    }

    #[test]
    fn failed_publish_leaves_copy_ahead_of_remote() {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        let alice = transport(&remote, &temp.path().join("alice"), "alice");
        alice.create_remote().unwrap();

        let a = alice.sync_local_copy().unwrap();
        assert!(!alice.has_unpublished(&a).unwrap());
        std::fs::write(a.join("base.txt"), "0").unwrap();
        alice.commit(&a, "base").unwrap();
        assert!(alice.has_unpublished(&a).unwrap());
        alice.publish(&a).unwrap();
        assert!(!alice.has_unpublished(&a).unwrap());

        std::fs::write(a.join("next.txt"), "1").unwrap();
        let next = alice.commit(&a, "next").unwrap();
        // A later sync keeps the commit and still reports it.
        alice.sync_local_copy().unwrap();
        assert_eq!(alice.head_revision(&a).as_deref(), Some(next.as_str()));
        assert!(alice.has_unpublished(&a).unwrap());
    }

    #[test]
    fn network_timeouts_map_to_timeout() {
        let guard = TransferGuard::new(Duration::from_secs(30));
        let timed_out = git2::Error::new(
            git2::ErrorCode::GenericError,
            ErrorClass::Net,
            "failed to connect to example.com: Connection timed out",
        );
        assert!(matches!(
            guard.map_error("https://example.com/s.git", &timed_out),
            SubstrateError::Timeout(_)
        ));
        let refused = git2::Error::new(
            git2::ErrorCode::GenericError,
            ErrorClass::Net,
            "failed to connect to example.com: Connection refused",
        );
        assert!(matches!(
            guard.map_error("https://example.com/s.git", &refused),
            SubstrateError::Transport(_)
        ));

        guard.expired.store(true, Ordering::SeqCst);
        assert!(matches!(
            guard.map_error("https://example.com/s.git", &refused),
            SubstrateError::Timeout(_)
        ));
    }

    #[test]
    fn unreachable_remote_is_transport_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nowhere.git");
        let t = transport(&missing, &temp.path().join("store"), "alice");
        let err = t.sync_local_copy().unwrap_err();
        assert!(matches!(err, SubstrateError::Transport(_)));
    }

    #[test]
    fn hosted_remotes_are_not_created() {
        let temp = TempDir::new().unwrap();
        let t = GitTransport::new(
            "https://example.com/acme/store.git",
            "main",
            temp.path().join("store"),
            "alice",
            Duration::from_secs(1),
        );
        assert!(matches!(t.create_remote(), Err(SubstrateError::Transport(_))));
    }
}
