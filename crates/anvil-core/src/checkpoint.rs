//! Working-tree checkpoints.
//!
//! A checkpoint is a labeled snapshot taken immediately before a mutating
//! action: the tree is staged and stashed, then the stash is re-applied so
//! the snapshot is a pure save point, never a destructive move. Rollback
//! discards the current tree and applies the most recent snapshot carrying
//! the reserved label prefix. Only that one snapshot is restorable; older
//! ones are listable read-only.
//!
//! Without version control the manager degrades to a warn-logged no-op.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

/// Reserved label prefix for snapshots owned by this manager.
pub const CHECKPOINT_PREFIX: &str = "anvil-checkpoint:";

/// Result of pushing a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Created,
    NoChanges,
}

/// The four version-control primitives the manager needs, plus read-only
/// listing. Backends must leave unrelated repository state alone.
pub trait VcsBackend: Send + Sync {
    /// Stage every working-tree change, including untracked files.
    fn stage_all(&self) -> Result<()>;

    /// Save the staged tree under `message` and reset the working tree to
    /// its last committed state.
    fn snapshot_push(&self, message: &str) -> Result<SnapshotOutcome>;

    /// Apply the most recent snapshot whose message contains `fragment`
    /// onto the working tree. Returns the applied message, if any.
    fn apply_most_recent(&self, fragment: &str) -> Result<Option<String>>;

    /// Discard all uncommitted changes and untracked files.
    fn discard_working_tree(&self) -> Result<()>;

    /// Snapshot messages, newest first.
    fn list_snapshots(&self) -> Result<Vec<String>>;
}

/// Outcome of a checkpoint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Created {
        label: String,
        created_at: DateTime<Utc>,
    },
    NoChanges,
    /// No version control present; nothing was done.
    Unavailable,
}

pub struct CheckpointManager {
    backend: Option<Box<dyn VcsBackend>>,
}

impl CheckpointManager {
    pub fn new(backend: Box<dyn VcsBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A manager that no-ops every operation.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    /// Build a git-backed manager for `working_dir`, degrading to disabled
    /// when the directory is not inside a repository.
    pub fn for_dir(working_dir: &Path) -> Self {
        match GitBackend::discover(working_dir) {
            Ok(Some(backend)) => Self::new(Box::new(backend)),
            Ok(None) => {
                tracing::warn!(
                    dir = %working_dir.display(),
                    "Not a version-controlled directory; checkpoints disabled"
                );
                Self::disabled()
            }
            Err(e) => {
                tracing::warn!("Version control unavailable ({}); checkpoints disabled", e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Snapshot the tree under `label`, leaving it untouched.
    pub fn create(&self, label: &str) -> Result<CheckpointOutcome> {
        let Some(backend) = &self.backend else {
            tracing::warn!("Checkpoint requested but version control is unavailable");
            return Ok(CheckpointOutcome::Unavailable);
        };

        let created_at = Utc::now();
        let message = format!(
            "{} {} ({})",
            CHECKPOINT_PREFIX,
            label,
            created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        backend.stage_all()?;
        match backend.snapshot_push(&message)? {
            SnapshotOutcome::NoChanges => {
                tracing::info!(label, "No changes to checkpoint");
                Ok(CheckpointOutcome::NoChanges)
            }
            SnapshotOutcome::Created => {
                // The push cleaned the tree; re-apply so the snapshot is a
                // save point rather than a destructive move.
                backend
                    .apply_most_recent(&message)?
                    .ok_or_else(|| anyhow!("snapshot vanished immediately after creation"))?;
                tracing::info!(label = %message, "Checkpoint created");
                Ok(CheckpointOutcome::Created {
                    label: message,
                    created_at,
                })
            }
        }
    }

    /// Discard the current tree and restore the most recent checkpoint.
    /// Returns the restored label, or `None` when there is nothing to
    /// restore (in which case the tree is left untouched).
    pub fn rollback(&self) -> Result<Option<String>> {
        let Some(backend) = &self.backend else {
            tracing::warn!("Rollback requested but version control is unavailable");
            return Ok(None);
        };

        let has_checkpoint = backend
            .list_snapshots()?
            .iter()
            .any(|message| message.contains(CHECKPOINT_PREFIX));
        if !has_checkpoint {
            tracing::warn!("Rollback requested but no checkpoint exists");
            return Ok(None);
        }

        backend.discard_working_tree()?;
        let applied = backend.apply_most_recent(CHECKPOINT_PREFIX)?;
        if let Some(label) = &applied {
            tracing::info!(label = %label, "Rolled back to checkpoint");
        }
        Ok(applied)
    }

    /// Checkpoint labels, newest first. Older entries are informational;
    /// only the newest is restorable through [`Self::rollback`].
    pub fn list(&self) -> Result<Vec<String>> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };
        Ok(backend
            .list_snapshots()?
            .into_iter()
            .filter(|message| message.contains(CHECKPOINT_PREFIX))
            .collect())
    }
}

// ── Git backend ────────────────────────────────────────────────────────

/// Shell-out git backend using stash-based snapshots.
pub struct GitBackend {
    repo_root: PathBuf,
}

impl GitBackend {
    /// Resolve the repository root for `path`, or `None` outside a repo.
    pub fn discover(path: &Path) -> Result<Option<Self>> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .output()
            .with_context(|| format!("failed to run git in {}", path.display()))?;

        if output.status.success() {
            let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if root.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Self {
                repo_root: PathBuf::from(root),
            }));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("not a git repository") {
            return Ok(None);
        }

        Err(anyhow!("git rev-parse failed: {}", stderr.trim()))
    }

    fn run_git(&self, args: &[&str]) -> Result<std::process::Output> {
        run_git(args, &self.repo_root)
    }
}

fn run_git(args: &[&str], cwd: &Path) -> Result<std::process::Output> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("failed to execute git {} in {}", args.join(" "), cwd.display()))?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let detail = if !stderr.is_empty() { stderr } else { stdout };
        Err(anyhow!("git {} failed: {}", args.join(" "), detail))
    }
}

impl VcsBackend for GitBackend {
    fn stage_all(&self) -> Result<()> {
        self.run_git(&["add", "-A"])?;
        Ok(())
    }

    fn snapshot_push(&self, message: &str) -> Result<SnapshotOutcome> {
        let output = self.run_git(&["stash", "push", "--include-untracked", "-m", message])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("No local changes") {
            return Ok(SnapshotOutcome::NoChanges);
        }
        Ok(SnapshotOutcome::Created)
    }

    fn apply_most_recent(&self, fragment: &str) -> Result<Option<String>> {
        let output = self.run_git(&["stash", "list", "--format=%gd%x09%gs"])?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        // `stash list` is newest-first already.
        for line in stdout.lines() {
            let Some((reference, subject)) = line.split_once('\t') else {
                continue;
            };
            if subject.contains(fragment) {
                self.run_git(&["stash", "apply", "--quiet", reference.trim()])?;
                return Ok(Some(subject.to_string()));
            }
        }

        Ok(None)
    }

    fn discard_working_tree(&self) -> Result<()> {
        self.run_git(&["reset", "--hard"])?;
        self.run_git(&["clean", "-fd"])?;
        Ok(())
    }

    fn list_snapshots(&self) -> Result<Vec<String>> {
        let output = self.run_git(&["stash", "list", "--format=%gs"])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::fs;
    use std::sync::Mutex;

    static GIT_AVAILABLE: Lazy<bool> = Lazy::new(|| {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    });

    // In-memory backend modelling a one-file working tree.
    struct FakeVcs {
        state: Mutex<FakeState>,
    }

    struct FakeState {
        committed: String,
        tree: String,
        snapshots: Vec<(String, String)>,
    }

    impl FakeVcs {
        fn new(committed: &str) -> Self {
            Self {
                state: Mutex::new(FakeState {
                    committed: committed.to_string(),
                    tree: committed.to_string(),
                    snapshots: Vec::new(),
                }),
            }
        }
    }

    impl VcsBackend for FakeVcs {
        fn stage_all(&self) -> Result<()> {
            Ok(())
        }

        fn snapshot_push(&self, message: &str) -> Result<SnapshotOutcome> {
            let mut state = self.state.lock().unwrap();
            if state.tree == state.committed {
                return Ok(SnapshotOutcome::NoChanges);
            }
            let tree = state.tree.clone();
            state.snapshots.push((message.to_string(), tree));
            state.tree = state.committed.clone();
            Ok(SnapshotOutcome::Created)
        }

        fn apply_most_recent(&self, fragment: &str) -> Result<Option<String>> {
            let mut state = self.state.lock().unwrap();
            let found = state
                .snapshots
                .iter()
                .rev()
                .find(|(message, _)| message.contains(fragment))
                .map(|(message, tree)| (message.clone(), tree.clone()));
            match found {
                Some((message, tree)) => {
                    state.tree = tree;
                    Ok(Some(message))
                }
                None => Ok(None),
            }
        }

        fn discard_working_tree(&self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.tree = state.committed.clone();
            Ok(())
        }

        fn list_snapshots(&self) -> Result<Vec<String>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .snapshots
                .iter()
                .rev()
                .map(|(message, _)| message.clone())
                .collect())
        }
    }

    impl VcsBackend for std::sync::Arc<FakeVcs> {
        fn stage_all(&self) -> Result<()> {
            self.as_ref().stage_all()
        }
        fn snapshot_push(&self, message: &str) -> Result<SnapshotOutcome> {
            self.as_ref().snapshot_push(message)
        }
        fn apply_most_recent(&self, fragment: &str) -> Result<Option<String>> {
            self.as_ref().apply_most_recent(fragment)
        }
        fn discard_working_tree(&self) -> Result<()> {
            self.as_ref().discard_working_tree()
        }
        fn list_snapshots(&self) -> Result<Vec<String>> {
            self.as_ref().list_snapshots()
        }
    }

    fn manager_over(fake: FakeVcs) -> (CheckpointManager, std::sync::Arc<FakeVcs>) {
        let fake = std::sync::Arc::new(fake);
        (CheckpointManager::new(Box::new(fake.clone())), fake)
    }

    fn tree_of(fake: &FakeVcs) -> String {
        fake.state.lock().unwrap().tree.clone()
    }

    fn set_tree(fake: &FakeVcs, value: &str) {
        fake.state.lock().unwrap().tree = value.to_string();
    }

    #[test]
    fn create_is_a_pure_save_point() {
        let (manager, fake) = manager_over(FakeVcs::new("base"));
        set_tree(&fake, "edited");

        let outcome = manager.create("write").unwrap();
        assert!(matches!(outcome, CheckpointOutcome::Created { .. }));
        // The tree must come back exactly as it was before the snapshot.
        assert_eq!(tree_of(&fake), "edited");
    }

    #[test]
    fn create_with_clean_tree_is_a_reported_noop() {
        let (manager, _fake) = manager_over(FakeVcs::new("base"));
        let outcome = manager.create("write").unwrap();
        assert_eq!(outcome, CheckpointOutcome::NoChanges);
    }

    #[test]
    fn checkpoint_mutate_rollback_round_trip() {
        let (manager, fake) = manager_over(FakeVcs::new("base"));

        set_tree(&fake, "edited");
        manager.create("write").unwrap();

        set_tree(&fake, "broken");
        let restored = manager.rollback().unwrap();
        assert!(restored.unwrap().contains(CHECKPOINT_PREFIX));
        assert_eq!(tree_of(&fake), "edited");
    }

    #[test]
    fn rollback_targets_the_newest_checkpoint_only() {
        let (manager, fake) = manager_over(FakeVcs::new("base"));

        set_tree(&fake, "v1");
        manager.create("one").unwrap();
        set_tree(&fake, "v2");
        manager.create("two").unwrap();

        set_tree(&fake, "v3");
        manager.rollback().unwrap();
        assert_eq!(tree_of(&fake), "v2");

        // Older checkpoints remain listable.
        let labels = manager.list().unwrap();
        assert_eq!(labels.len(), 2);
        assert!(labels[0].contains("two"));
        assert!(labels[1].contains("one"));
    }

    #[test]
    fn rollback_without_checkpoint_leaves_tree_alone() {
        let (manager, fake) = manager_over(FakeVcs::new("base"));
        set_tree(&fake, "precious");

        assert!(manager.rollback().unwrap().is_none());
        assert_eq!(tree_of(&fake), "precious");
    }

    #[test]
    fn disabled_manager_noops_with_warnings() {
        let manager = CheckpointManager::disabled();
        assert!(!manager.is_enabled());
        assert_eq!(manager.create("x").unwrap(), CheckpointOutcome::Unavailable);
        assert!(manager.rollback().unwrap().is_none());
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn discover_outside_a_repo_yields_none() {
        if !*GIT_AVAILABLE {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        assert!(GitBackend::discover(dir.path()).unwrap().is_none());
    }

    #[test]
    fn git_backed_round_trip() {
        if !*GIT_AVAILABLE {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let git = |args: &[&str]| run_git(args, root).unwrap();

        git(&["init", "-q"]);
        git(&["config", "user.email", "dev@example.com"]);
        git(&["config", "user.name", "Dev"]);

        fs::write(root.join("main.rs"), "fn main() {}\n").unwrap();
        git(&["add", "-A"]);
        git(&["commit", "-q", "-m", "initial"]);

        // Mutate tracked + add untracked, then checkpoint.
        fs::write(root.join("main.rs"), "fn main() { edited(); }\n").unwrap();
        fs::write(root.join("notes.txt"), "untracked\n").unwrap();

        let manager = CheckpointManager::for_dir(root);
        assert!(manager.is_enabled());
        let outcome = manager.create("edit").unwrap();
        assert!(matches!(outcome, CheckpointOutcome::Created { .. }));

        // Save point: the tree is untouched.
        assert_eq!(
            fs::read_to_string(root.join("main.rs")).unwrap(),
            "fn main() { edited(); }\n"
        );
        assert!(root.join("notes.txt").exists());

        // Break the tree, then roll back.
        fs::write(root.join("main.rs"), "garbage\n").unwrap();
        fs::write(root.join("junk.tmp"), "junk\n").unwrap();

        let restored = manager.rollback().unwrap();
        assert!(restored.unwrap().contains(CHECKPOINT_PREFIX));
        assert_eq!(
            fs::read_to_string(root.join("main.rs")).unwrap(),
            "fn main() { edited(); }\n"
        );
        assert_eq!(
            fs::read_to_string(root.join("notes.txt")).unwrap(),
            "untracked\n"
        );
        assert!(!root.join("junk.tmp").exists());
    }
}
