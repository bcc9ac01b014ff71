// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Fail-fast task supervision.
//!
//! The watcher and the reconciler run as two independent tasks sharing only
//! the event queue. Neither returns in steady state, so any completion is
//! abnormal. On the first completion the harness aborts the surviving task
//! and returns, letting the process die rather than attempting in-process
//! recovery: a fresh process re-derives all watcher and queue state through
//! the list-then-watch protocol, while a partially restarted one cannot.
//!
//! A shutdown signal (Ctrl-C / SIGINT) is the one clean exit.

use crate::{reconcile::Reconciler, store::SnapshotStore, watch};

use anyhow::{bail, Context, Result};
use kube::Client;
use tokio::sync::mpsc;
use tracing::info;

/// Run the watch-to-commit pipeline until a fatal failure or shutdown.
///
/// # Errors
///
/// - Return error if either task fails, panics, or exits unexpectedly.
pub async fn run_pipeline(client: Client, store: SnapshotStore) -> Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let mut watcher = tokio::spawn(watch::run_watcher(client, events_tx));
    let mut reconciler = tokio::spawn(Reconciler::new(store).run(events_rx));

    tokio::select! {
        result = &mut watcher => {
            reconciler.abort();
            result.context("watcher panicked")??;
            bail!("watcher exited unexpectedly");
        }
        result = &mut reconciler => {
            watcher.abort();
            result.context("reconciler panicked")?;
            bail!("reconciler exited unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
            watcher.abort();
            reconciler.abort();
            Ok(())
        }
    }
}
