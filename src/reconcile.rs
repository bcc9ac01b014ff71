// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Event reconciliation into the snapshot store.
//!
//! The reconciler is the sole consumer of the event queue and the sole
//! writer to the snapshot store. It applies events strictly one at a time,
//! in queue order. Order matters per identity: applying a deletion before
//! the update that preceded it would resurrect a dead pod's file or clobber
//! a newer manifest with an older one.
//!
//! A single bad event must never stall the pipeline. Every failure raised
//! while handling one event is logged with the event's kind and identity,
//! then dropped; only the queue itself going away ends the loop.

use crate::{
    manifest::ManifestError,
    store::{SnapshotStore, StoreError},
    watch::PodEvent,
};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

/// Applies pod events to the snapshot store, one at a time.
pub struct Reconciler {
    store: SnapshotStore,
}

impl Reconciler {
    /// Construct new reconciler over target store.
    pub fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    /// Drain the event queue until it closes.
    ///
    /// Per-event failures are logged and swallowed. Queue closure is the
    /// only exit; in steady state that means the producer died, and the
    /// supervision harness tears the process down either way.
    pub async fn run(self, mut queue: UnboundedReceiver<PodEvent>) {
        while let Some(event) = queue.recv().await {
            if let Err(err) = self.apply(&event) {
                match &event {
                    PodEvent::Added(pod) | PodEvent::Modified(pod) | PodEvent::Deleted(pod) => {
                        error!(
                            "failed to handle {} on pod {}/{}: {err}",
                            event.label(),
                            pod.namespace,
                            pod.name
                        );
                    }
                    PodEvent::InitialSyncDone => {
                        error!("failed to handle {}: {err}", event.label());
                    }
                }
            }
        }

        info!("event queue closed; reconciler stopping");
    }

    /// Apply one event to the store.
    ///
    /// # Errors
    ///
    /// - Return [`ReconcileError::Manifest`] if sanitization/rendering fails.
    /// - Return [`ReconcileError::Store`] if the store mutation or commit
    ///   fails.
    pub fn apply(&self, event: &PodEvent) -> Result<()> {
        let pod = match event {
            PodEvent::InitialSyncDone => {
                info!("done initial sync");
                return Ok(());
            }
            PodEvent::Added(pod) | PodEvent::Modified(pod) => {
                info!("{} {}/{}", event.label(), pod.namespace, pod.name);
                self.store
                    .write_manifest(&pod.rel_path(), &pod.to_sanitized_yaml()?)?;
                pod
            }
            PodEvent::Deleted(pod) => {
                info!("{} {}/{}", event.label(), pod.namespace, pod.name);
                self.store.remove_manifest(&pod.rel_path())?;
                pod
            }
        };

        self.store.stage_all()?;
        // A no-op commit outcome is success: replayed events change nothing.
        self.store.commit(&format!(
            "{} {}/{}",
            event.label(),
            pod.namespace,
            pod.name
        ))?;

        Ok(())
    }

    /// Borrow the underlying store.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }
}

/// Reconciliation error types. These are per-event, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Manifest sanitization or rendering fails.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Snapshot store mutation or commit fails.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Friendly result alias :3
type Result<T, E = ReconcileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::CommitIdentity,
        manifest::PodSnapshot,
        store::CommitOutcome,
    };
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use serde_json::json;
    use std::path::Path;

    fn reconciler() -> anyhow::Result<Reconciler> {
        let store = SnapshotStore::open_or_init("repo")?;
        store.set_identity(&CommitIdentity {
            name: "John Doe".into(),
            email: "john@doe.com".into(),
        })?;
        Ok(Reconciler::new(store))
    }

    fn snapshot(name: &str, manifest: serde_json::Value) -> PodSnapshot {
        PodSnapshot {
            namespace: "default".into(),
            name: name.into(),
            manifest,
        }
    }

    #[sealed_test]
    fn apply_added_writes_sanitized_manifest() -> anyhow::Result<()> {
        let reconciler = reconciler()?;
        reconciler.apply(&PodEvent::Added(snapshot(
            "pod-a",
            json!({
                "metadata": {
                    "name": "pod-a",
                    "managedFields": [{"manager": "kubelet"}],
                },
            }),
        )))?;

        let contents = std::fs::read_to_string("repo/default/pod-a.yaml")?;
        assert!(!contents.contains("managedFields"));
        assert!(contents.contains("name: pod-a"));

        Ok(())
    }

    #[sealed_test]
    fn apply_is_idempotent_for_added() -> anyhow::Result<()> {
        let reconciler = reconciler()?;
        let event = PodEvent::Added(snapshot("pod-a", json!({"metadata": {"name": "pod-a"}})));

        reconciler.apply(&event)?;
        let first = std::fs::read_to_string("repo/default/pod-a.yaml")?;

        reconciler.apply(&event)?;
        let second = std::fs::read_to_string("repo/default/pod-a.yaml")?;
        assert_eq!(first, second);

        // Second application stages nothing, so the commit is a no-op.
        reconciler.store().stage_all()?;
        assert_eq!(
            reconciler.store().commit("ADDED default/pod-a")?,
            CommitOutcome::NothingToCommit
        );

        Ok(())
    }

    #[sealed_test]
    fn apply_deleted_tolerates_absent_file() -> anyhow::Result<()> {
        let reconciler = reconciler()?;
        reconciler.apply(&PodEvent::Deleted(snapshot("never-existed", json!({}))))?;
        assert!(!Path::new("repo/default/never-existed.yaml").exists());
        Ok(())
    }

    #[sealed_test]
    fn apply_sentinel_touches_nothing() -> anyhow::Result<()> {
        let reconciler = reconciler()?;
        reconciler.apply(&PodEvent::InitialSyncDone)?;
        assert!(std::fs::read_dir("repo")?
            .filter_map(|entry| entry.ok())
            .all(|entry| entry.file_name() == ".git"));
        Ok(())
    }

    #[sealed_test]
    fn apply_modified_overwrites_manifest() -> anyhow::Result<()> {
        let reconciler = reconciler()?;
        reconciler.apply(&PodEvent::Added(snapshot(
            "pod-a",
            json!({"spec": {"nodeName": "worker-1"}}),
        )))?;
        reconciler.apply(&PodEvent::Modified(snapshot(
            "pod-a",
            json!({"spec": {"nodeName": "worker-2"}}),
        )))?;

        let contents = std::fs::read_to_string("repo/default/pod-a.yaml")?;
        assert!(contents.contains("worker-2"));
        assert!(!contents.contains("worker-1"));

        Ok(())
    }
}
