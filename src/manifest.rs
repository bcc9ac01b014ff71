// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pod manifest representation.
//!
//! A __snapshot__ is the serialized form of a pod at the moment the cluster
//! API reported it. Snapshots address into the mirror repository through one
//! scheme only: `<namespace>/<name>.yaml` relative to the repository root.
//! Within a namespace, pod names are unique at any instant, so the pair
//! `(namespace, name)` is the identity of a snapshot.
//!
//! # Sanitization
//!
//! The API server decorates every object with bookkeeping that churns on
//! each write without carrying any audit value. Persisting it verbatim would
//! bury meaningful commit diffs under noise, so such fields are stripped
//! before a manifest ever reaches the working tree. Currently that covers
//! `metadata.managedFields`, the server-side-apply ownership ledger.

use k8s_openapi::api::core::v1::Pod;
use serde_json::Value;
use std::path::PathBuf;

/// Serialized pod captured from the cluster API.
#[derive(Debug, Clone, PartialEq)]
pub struct PodSnapshot {
    /// Namespace the pod lives in.
    pub namespace: String,

    /// Name of the pod, unique within its namespace.
    pub name: String,

    /// Raw manifest as reported by the API server, unsanitized.
    pub manifest: Value,
}

impl PodSnapshot {
    /// Capture a snapshot from a typed pod object.
    ///
    /// The typed object drops its `apiVersion`/`kind` pair during
    /// serialization, so both are restored here to keep the persisted
    /// manifest loadable by standard tooling.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Serialize`] if the pod cannot be serialized.
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let mut manifest = serde_json::to_value(pod)?;
        if let Some(object) = manifest.as_object_mut() {
            object.insert("apiVersion".into(), "v1".into());
            object.insert("kind".into(), "Pod".into());
        }

        Ok(Self {
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            name: pod.metadata.name.clone().unwrap_or_default(),
            manifest,
        })
    }

    /// Path of this snapshot relative to the repository root.
    pub fn rel_path(&self) -> PathBuf {
        snapshot_rel_path(&self.namespace, &self.name)
    }

    /// Render the sanitized manifest as YAML.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Render`] if YAML rendering fails.
    pub fn to_sanitized_yaml(&self) -> Result<String> {
        let clean = sanitize(self.manifest.clone());
        Ok(serde_yaml::to_string(&clean)?)
    }
}

/// Map a pod identity to its path relative to the repository root.
pub fn snapshot_rel_path(namespace: &str, name: &str) -> PathBuf {
    PathBuf::from(namespace).join(format!("{name}.yaml"))
}

/// Strip operationally volatile fields from a raw manifest.
///
/// Removing an absent field is a no-op, never an error.
pub fn sanitize(mut manifest: Value) -> Value {
    if let Some(metadata) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("managedFields");
    }

    manifest
}

/// Manifest serialization error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Failed to serialize pod object into a manifest.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Failed to render manifest as YAML.
    #[error(transparent)]
    Render(#[from] serde_yaml::Error),
}

/// Friendly result alias :3
type Result<T, E = ManifestError> = std::result::Result<T, E>;
