// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use kube_git_mirror::{supervise, ApiMode, CommitIdentity, MirrorConfig, SnapshotStore};

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use std::process::exit;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  kube-git-mirror [options] <repo_path>",
    version
)]
struct Cli {
    /// Path to the snapshot store repository.
    #[arg(value_name = "repo_path")]
    pub repo_path: String,

    /// Connect to an explicit API server address instead of a kubeconfig.
    #[arg(long, value_name = "url")]
    pub api_url: Option<String>,

    /// Use the in-cluster service account configuration.
    #[arg(long)]
    pub in_cluster: bool,

    /// Author name attributed to snapshot commits.
    #[arg(long, value_name = "name", default_value = "kube-git-mirror")]
    pub git_username: String,

    /// Author email attributed to snapshot commits.
    #[arg(long, value_name = "email", default_value = "kube-git-mirror@localhost")]
    pub git_email: String,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let api = match (self.api_url, self.in_cluster) {
            (Some(url), _) => ApiMode::Url(url),
            (None, true) => ApiMode::InCluster,
            (None, false) => ApiMode::Kubeconfig,
        };
        let identity = CommitIdentity {
            name: self.git_username,
            email: self.git_email,
        };
        let config = MirrorConfig::new(self.repo_path, api, identity)?;

        let client = connect(&config.api).await?;
        let store = SnapshotStore::open_or_init(config.repo_path())?;
        store.set_identity(&config.identity)?;

        supervise::run_pipeline(client, store).await
    }
}

/// Build a cluster API client for target connection mode.
async fn connect(api: &ApiMode) -> Result<Client> {
    let config = match api {
        ApiMode::Url(url) => {
            let url = url
                .parse::<http::Uri>()
                .with_context(|| format!("invalid API server address {url:?}"))?;
            kube::Config::new(url)
        }
        ApiMode::InCluster => {
            kube::Config::incluster().context("failed to load in-cluster configuration")?
        }
        ApiMode::Kubeconfig => kube::Config::infer()
            .await
            .context("failed to load kubeconfig")?,
    };

    Client::try_from(config).context("failed to construct cluster API client")
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry().with(layer).with(filter).init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}
