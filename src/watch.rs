// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Resumable pod watch.
//!
//! Wraps the cluster API's "list then watch" protocol into one never-ending
//! sequence of [`PodEvent`]s pushed into the event queue.
//!
//! # List Then Watch
//!
//! A watch is a stateful network stream: it starts from a __resource
//! version__ and delivers every change after that point, but the server may
//! cut the stream at any time, and may refuse a version that has aged out
//! of its change history. The only way to close a delivery gap after such
//! an interruption is to take a fresh full listing and watch onward from
//! the version that listing reports.
//!
//! So the watcher loops: list everything and emit [`PodEvent::Added`] per
//! item, mark the end of the listing with [`PodEvent::InitialSyncDone`],
//! then stream live deltas while tracking the newest resource version seen.
//! Any stream termination throws the stream away and starts the loop over.
//! A re-list replays `Added` events for pods that never changed, which the
//! reconciler absorbs idempotently, and repeats the sync marker, which the
//! reconciler must tolerate as well.
//!
//! The watcher owns all resumption state (resource version, stream handle);
//! nothing of it is shared. Only the outward event sequence escapes.

use crate::manifest::PodSnapshot;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams, WatchEvent, WatchParams},
    Client,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Watch timeout handed to the API server, in seconds.
///
/// The server cuts watches that run longer than its own cap anyway; asking
/// for slightly less keeps reconnects on our schedule instead of its.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Change notification produced by the watcher.
///
/// Closed set of event kinds, matched exhaustively by the reconciler, so a
/// new kind cannot be silently ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum PodEvent {
    /// Pod appeared, either live or during a (re-)listing.
    Added(PodSnapshot),

    /// Pod changed.
    Modified(PodSnapshot),

    /// Pod was removed. The snapshot carries the last-known identity; its
    /// manifest contents are not persisted.
    Deleted(PodSnapshot),

    /// The initial full listing is complete; everything after is live
    /// deltas. May repeat after a watch interruption.
    InitialSyncDone,
}

impl PodEvent {
    /// Uppercase kind label used in logs and commit messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Added(_) => "ADDED",
            Self::Modified(_) => "MODIFIED",
            Self::Deleted(_) => "DELETED",
            Self::InitialSyncDone => "SYNC",
        }
    }
}

/// Run the watcher until a fatal error.
///
/// Loops over list-then-watch forever, pushing events into `queue`. Stream
/// interruptions restart the loop; they are logged and never surfaced.
/// Only the very first listing is fatal on failure: it is the startup probe
/// that the API is reachable at all. Once one listing has succeeded, later
/// re-list failures are part of the same transient disruption that cut the
/// stream, and are retried like the stream itself.
///
/// # Errors
///
/// - Return [`WatchError::Api`] if the first full listing cannot be
///   obtained.
/// - Return [`WatchError::QueueClosed`] if the consumer went away.
pub async fn run_watcher(client: Client, queue: UnboundedSender<PodEvent>) -> Result<()> {
    let pods: Api<Pod> = Api::all(client);
    let mut version = list_and_emit(&pods, &queue).await?;

    loop {
        send(&queue, PodEvent::InitialSyncDone)?;
        stream_deltas(&pods, &queue, &mut version).await?;
        warn!("watch stream ended; restarting from a full listing");
        version = relist(&pods, &queue).await?;
    }
}

/// Re-list after a stream interruption, retrying transient API failures.
///
/// The protocol is idempotent to repeat, so a failed re-list just tries
/// again until the API answers. Queue closure still escapes as fatal.
async fn relist(pods: &Api<Pod>, queue: &UnboundedSender<PodEvent>) -> Result<String> {
    loop {
        match list_and_emit(pods, queue).await {
            Ok(version) => return Ok(version),
            Err(error) if is_retriable(&error) => {
                warn!("failed to re-list pods: {error}; retrying");
            }
            Err(error) => return Err(error),
        }
    }
}

/// Whether a listing failure is transient once a first sync has succeeded.
fn is_retriable(error: &WatchError) -> bool {
    matches!(error, WatchError::Api(_))
}

/// Take a full listing, emit `Added` per item, return its resource version.
async fn list_and_emit(
    pods: &Api<Pod>,
    queue: &UnboundedSender<PodEvent>,
) -> Result<String> {
    let list = pods.list(&ListParams::default()).await?;
    let version = list.metadata.resource_version.clone().unwrap_or_default();

    info!(
        "listed {} pods at resource version {version:?}",
        list.items.len()
    );

    for pod in &list.items {
        if let Some(snapshot) = capture(pod) {
            send(queue, PodEvent::Added(snapshot))?;
        }
    }

    Ok(version)
}

/// Capture a snapshot from a pod, skipping the pod on failure.
///
/// One unserializable pod must not take the whole pipeline down; it is
/// logged and dropped, and the stream moves on.
fn capture(pod: &Pod) -> Option<PodSnapshot> {
    match PodSnapshot::from_pod(pod) {
        Ok(snapshot) => Some(snapshot),
        Err(error) => {
            warn!(
                "skipping pod {}/{}: {error}",
                pod.metadata.namespace.as_deref().unwrap_or_default(),
                pod.metadata.name.as_deref().unwrap_or_default()
            );
            None
        }
    }
}

/// Stream live deltas from `version` until the stream terminates.
///
/// Returns `Ok(())` when the caller should re-list: stream end, stream
/// error, server-reported failure (including an expired version). Only
/// queue closure escapes as an error.
async fn stream_deltas(
    pods: &Api<Pod>,
    queue: &UnboundedSender<PodEvent>,
    version: &mut String,
) -> Result<()> {
    let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
    let mut stream = match pods.watch(&params, version.as_str()).await {
        Ok(stream) => stream.boxed(),
        Err(error) => {
            warn!("failed to open watch stream: {error}");
            return Ok(());
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(WatchEvent::Added(pod)) => {
                track_version(version, &pod);
                if let Some(snapshot) = capture(&pod) {
                    send(queue, PodEvent::Added(snapshot))?;
                }
            }
            Ok(WatchEvent::Modified(pod)) => {
                track_version(version, &pod);
                if let Some(snapshot) = capture(&pod) {
                    send(queue, PodEvent::Modified(snapshot))?;
                }
            }
            Ok(WatchEvent::Deleted(pod)) => {
                track_version(version, &pod);
                if let Some(snapshot) = capture(&pod) {
                    send(queue, PodEvent::Deleted(snapshot))?;
                }
            }
            Ok(WatchEvent::Bookmark(bookmark)) => {
                // Bookmarks advance the resume point without carrying a delta.
                debug!(
                    "bookmark at resource version {:?}",
                    bookmark.metadata.resource_version
                );
                *version = bookmark.metadata.resource_version;
            }
            Ok(WatchEvent::Error(response)) => {
                if response.code == 410 {
                    warn!("resource version {version:?} expired; resyncing");
                } else {
                    warn!(
                        "watch failed with {} ({}); resyncing",
                        response.message, response.code
                    );
                }
                return Ok(());
            }
            Err(error) => {
                warn!("watch stream broke: {error}");
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Record the newest resource version observed on a streamed pod.
fn track_version(version: &mut String, pod: &Pod) {
    if let Some(observed) = &pod.metadata.resource_version {
        version.clone_from(observed);
    }
}

fn send(queue: &UnboundedSender<PodEvent>, event: PodEvent) -> Result<()> {
    queue.send(event).map_err(|_| WatchError::QueueClosed)
}

/// Watcher error types. All of these are fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The cluster API rejected or failed a listing request.
    #[error(transparent)]
    Api(#[from] kube::Error),

    /// The event queue consumer went away.
    #[error("event queue closed before the watcher finished")]
    QueueClosed,
}

/// Friendly result alias :3
type Result<T, E = WatchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn snapshot() -> PodSnapshot {
        PodSnapshot {
            namespace: "default".into(),
            name: "pod-a".into(),
            manifest: json!({}),
        }
    }

    #[test]
    fn event_labels_match_commit_message_kinds() {
        assert_eq!(PodEvent::Added(snapshot()).label(), "ADDED");
        assert_eq!(PodEvent::Modified(snapshot()).label(), "MODIFIED");
        assert_eq!(PodEvent::Deleted(snapshot()).label(), "DELETED");
        assert_eq!(PodEvent::InitialSyncDone.label(), "SYNC");
    }

    #[test]
    fn send_reports_closed_queue() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let result = send(&tx, PodEvent::InitialSyncDone);
        assert!(matches!(result, Err(WatchError::QueueClosed)));
    }

    #[test]
    fn api_failure_is_retriable_after_first_sync() {
        let error = WatchError::Api(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "connection refused".into(),
            reason: "ServiceUnavailable".into(),
            code: 503,
        }));
        assert!(is_retriable(&error));
    }

    #[test]
    fn closed_queue_is_never_retriable() {
        assert!(!is_retriable(&WatchError::QueueClosed));
    }

    #[test]
    fn capture_yields_snapshot_for_listed_pod() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "pod-a", "namespace": "default"},
        }))
        .unwrap();

        let snapshot = capture(&pod).unwrap();
        assert_eq!(snapshot.namespace, "default");
        assert_eq!(snapshot.name, "pod-a");
    }
}
