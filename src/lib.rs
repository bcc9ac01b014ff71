// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror live Kubernetes pod state into a Git-versioned file tree.
//!
//! The pipeline has exactly two moving parts connected by one queue: a
//! [`watch`]er holding a resumable list-then-watch stream against the
//! cluster API, and a [`reconcile`]r persisting each observed event as a
//! YAML file plus one commit in the snapshot [`store`]. The result is a
//! human-diffable, append-only audit history of pod lifecycle events.
//!
//! Delivery is at-least-once: a watch interruption triggers a full re-list
//! that replays events, and reconciliation absorbs replays idempotently
//! (identical file content, no-op commit).

pub mod config;
pub mod manifest;
pub mod reconcile;
pub mod store;
pub mod supervise;
pub mod watch;

pub use config::{ApiMode, CommitIdentity, ConfigError, MirrorConfig};
pub use manifest::{ManifestError, PodSnapshot};
pub use reconcile::{ReconcileError, Reconciler};
pub use store::{CommitOutcome, SnapshotStore, StoreError};
pub use watch::{PodEvent, WatchError};
