// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot store management and manipulation.
//!
//! The mirror persists pod manifests into one place called the __snapshot
//! store__: an ordinary Git repository whose working tree holds the
//! latest-known manifest per pod identity, and whose commit log holds the
//! full history of observed lifecycle events.
//!
//! # Snapshot Store Layout
//!
//! The snapshot store can generally be placed anywhere on the user's file
//! system; its location is handed over at startup. Each namespace is given
//! its own directory at the top-level of the working tree, and each pod is
//! given a single YAML file inside its namespace directory. So
//! `<root>/default/pod-a.yaml` means the store tracks a pod named "pod-a"
//! in the "default" namespace.
//!
//! The commit log is append-only. History is never rewritten, which is what
//! makes the store usable as an audit record: every observed event that
//! changed the working tree is one commit, attributable to the identity
//! configured at startup.
//!
//! # No-op Commits
//!
//! Re-listing after a watch interruption replays events for resources that
//! never changed. Applying such an event leaves the working tree untouched,
//! so the follow-up commit has nothing to record. The store reports this
//! outcome as [`CommitOutcome::NothingToCommit`] rather than an error,
//! because conflating it with real commit failures would spuriously abort
//! harmless replays.

use crate::config::CommitIdentity;

use git2::{IndexAddOption, Oid, Repository};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Git-backed store of pod manifests.
pub struct SnapshotStore {
    repository: Repository,
    root: PathBuf,
}

impl SnapshotStore {
    /// Open the snapshot store at target path, initializing it if absent.
    ///
    /// A path without a ".git" entry is treated as a fresh store: the
    /// directory tree is created as needed and a new repository is
    /// initialized there. An existing repository is opened as-is, with its
    /// commit history preserved.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Io`] if the directory tree cannot be created.
    /// - Return [`StoreError::Git2`] if libgit2 operations fail.
    #[instrument(skip(root), level = "debug")]
    pub fn open_or_init(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let repository = if root.join(".git").exists() {
            debug!("open snapshot store at {:?}", root.display());
            Repository::open(&root)?
        } else {
            info!("initialize snapshot store at {:?}", root.display());
            mkdirp::mkdirp(&root)?;
            Repository::init(&root)?
        };

        Ok(Self { repository, root })
    }

    /// Set the identity that commits are attributed to.
    ///
    /// Written into the repository-local configuration, so the identity
    /// survives restarts and never leaks into the user's global Git setup.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Git2`] if libgit2 operations fail.
    pub fn set_identity(&self, identity: &CommitIdentity) -> Result<()> {
        let mut config = self.repository.config()?;
        config.set_str("user.name", &identity.name)?;
        config.set_str("user.email", &identity.email)?;

        Ok(())
    }

    /// Root path of the store's working tree.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Write a manifest into the working tree, overwriting any existing one.
    ///
    /// Creates the parent namespace directory when it does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Io`] if directory creation or the write fails.
    pub fn write_manifest(&self, rel_path: &Path, contents: &str) -> Result<()> {
        let path = self.root.join(rel_path);
        if let Some(parent) = path.parent() {
            mkdirp::mkdirp(parent)?;
        }
        fs::write(path, contents)?;

        Ok(())
    }

    /// Remove a manifest from the working tree.
    ///
    /// Absence of the file is not an error: a deletion event may race a
    /// re-list that never wrote the file in the first place.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Io`] if removal fails for any reason other
    ///   than the file not existing.
    pub fn remove_manifest(&self, rel_path: &Path) -> Result<()> {
        match fs::remove_file(self.root.join(rel_path)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Stage every working-tree change, additions and deletions alike.
    ///
    /// Equivalent to `git add -A`: new files are added, modified tracked
    /// files are refreshed, and deleted tracked files are removed from the
    /// index.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self), level = "debug")]
    pub fn stage_all(&self) -> Result<()> {
        let mut index = self.repository.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        Ok(())
    }

    /// Commit the staged index to HEAD with target message.
    ///
    /// When the staged tree is identical to HEAD's tree there is nothing to
    /// record, and [`CommitOutcome::NothingToCommit`] is returned instead of
    /// an error. The same holds for an empty tree on a repository without
    /// any commits yet. The first real commit has no parent.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self), level = "debug")]
    pub fn commit(&self, message: &str) -> Result<CommitOutcome> {
        let mut index = self.repository.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repository.find_tree(tree_id)?;

        // INVARIANT: Always determine latest parent commit to append to.
        let parent = self
            .repository
            .head()
            .ok()
            .and_then(|head| head.target())
            .map(|oid| self.repository.find_commit(oid))
            .transpose()?;

        let unchanged = match &parent {
            Some(parent) => parent.tree_id() == tree_id,
            None => tree.is_empty(),
        };
        if unchanged {
            debug!("nothing to commit for {message:?}");
            return Ok(CommitOutcome::NothingToCommit);
        }

        let signature = self.repository.signature()?;
        let parents = parent.iter().collect::<Vec<_>>();
        let oid = self.repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        info!("committed {oid} {message:?}");

        Ok(CommitOutcome::Committed(oid))
    }
}

/// Outcome of a commit attempt against the snapshot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was appended to the log.
    Committed(Oid),

    /// The staged tree matched HEAD; no commit was created.
    NothingToCommit,
}

/// Snapshot store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Working-tree file operations fail.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;

    fn identity() -> CommitIdentity {
        CommitIdentity {
            name: "John Doe".into(),
            email: "john@doe.com".into(),
        }
    }

    fn store() -> anyhow::Result<SnapshotStore> {
        let store = SnapshotStore::open_or_init("repo")?;
        store.set_identity(&identity())?;
        Ok(store)
    }

    #[sealed_test]
    fn open_or_init_creates_fresh_repository() -> anyhow::Result<()> {
        let _ = store()?;
        assert!(Path::new("repo/.git").exists());
        Ok(())
    }

    #[sealed_test]
    fn open_or_init_preserves_existing_history() -> anyhow::Result<()> {
        let first = store()?;
        first.write_manifest(Path::new("default/pod-a.yaml"), "a: 1\n")?;
        first.stage_all()?;
        let CommitOutcome::Committed(oid) = first.commit("ADDED default/pod-a")? else {
            anyhow::bail!("expected a real commit");
        };
        drop(first);

        let reopened = SnapshotStore::open_or_init("repo")?;
        let head = reopened.repository.head()?.target();
        assert_eq!(head, Some(oid));

        Ok(())
    }

    #[sealed_test]
    fn commit_reports_noop_when_tree_unchanged() -> anyhow::Result<()> {
        let store = store()?;
        store.write_manifest(Path::new("default/pod-a.yaml"), "a: 1\n")?;
        store.stage_all()?;
        assert!(matches!(
            store.commit("ADDED default/pod-a")?,
            CommitOutcome::Committed(_)
        ));

        // Replayed event: same content, nothing staged.
        store.write_manifest(Path::new("default/pod-a.yaml"), "a: 1\n")?;
        store.stage_all()?;
        assert_eq!(
            store.commit("ADDED default/pod-a")?,
            CommitOutcome::NothingToCommit
        );

        Ok(())
    }

    #[sealed_test]
    fn stage_all_picks_up_deletions() -> anyhow::Result<()> {
        let store = store()?;
        store.write_manifest(Path::new("default/pod-a.yaml"), "a: 1\n")?;
        store.stage_all()?;
        store.commit("ADDED default/pod-a")?;

        store.remove_manifest(Path::new("default/pod-a.yaml"))?;
        store.stage_all()?;
        assert!(matches!(
            store.commit("DELETED default/pod-a")?,
            CommitOutcome::Committed(_)
        ));

        Ok(())
    }

    #[sealed_test]
    fn remove_manifest_tolerates_absent_file() -> anyhow::Result<()> {
        let store = store()?;
        store.remove_manifest(Path::new("default/never-existed.yaml"))?;
        Ok(())
    }
}
