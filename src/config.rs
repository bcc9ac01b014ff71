// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Startup configuration layout.
//!
//! Everything the mirror needs to know before it can run: where the
//! snapshot store lives, how to reach the cluster API, and whom to
//! attribute commits to. Construction from CLI arguments is left to the
//! caller to figure out.

use std::path::{Path, PathBuf};

/// Full startup configuration for the mirror process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Root path of the snapshot store working tree.
    pub repo_path: PathBuf,

    /// How to connect to the cluster API.
    pub api: ApiMode,

    /// Identity attributed to snapshot store commits.
    pub identity: CommitIdentity,
}

impl MirrorConfig {
    /// Construct new mirror configuration.
    ///
    /// Performs shell expansion on the repository path, so both "~" and
    /// environment variables are usable from the command line.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if expansion fails.
    pub fn new(
        repo_path: impl AsRef<str>,
        api: ApiMode,
        identity: CommitIdentity,
    ) -> Result<Self> {
        let repo_path = PathBuf::from(
            shellexpand::full(repo_path.as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        );

        Ok(Self {
            repo_path,
            api,
            identity,
        })
    }

    /// Treat repository path as [`Path`] slice.
    pub fn repo_path(&self) -> &Path {
        self.repo_path.as_path()
    }
}

/// Cluster API connection mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiMode {
    /// Connect to an explicit API server address.
    Url(String),

    /// Use the in-cluster service account configuration.
    InCluster,

    /// Use the local kubeconfig, the default for interactive use.
    Kubeconfig,
}

/// Identity to attribute snapshot store commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    /// Commit author name.
    pub name: String,

    /// Commit author email.
    pub email: String,
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn identity() -> CommitIdentity {
        CommitIdentity {
            name: "John Doe".into(),
            email: "john@doe.com".into(),
        }
    }

    #[sealed_test(env = [("MIRROR_ROOT", "/var/lib/mirror")])]
    fn new_expands_repo_path() -> anyhow::Result<()> {
        let result = MirrorConfig::new("$MIRROR_ROOT/pods", ApiMode::Kubeconfig, identity())?;
        assert_eq!(result.repo_path(), Path::new("/var/lib/mirror/pods"));
        Ok(())
    }

    #[sealed_test]
    fn new_keeps_plain_path_untouched() -> anyhow::Result<()> {
        let result = MirrorConfig::new(
            "/srv/pods",
            ApiMode::Url("https://localhost:6443".into()),
            identity(),
        )?;
        assert_eq!(result.repo_path(), Path::new("/srv/pods"));
        Ok(())
    }
}
