//! Loads resource manifests from a directory into a [`Store`] and keeps the
//! store in sync with the directory.

use super::resources::Resource;
use super::store::Store;
use crate::watch::watch_path;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid manifest in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("cannot watch manifests: {0}")]
    Watch(#[from] notify::Error),
}

/// Reads every `*.yml`/`*.yaml` file directly under `dir`, in path order.
/// Files may hold several documents; documents of other kinds are ignored.
/// Fails on the first file that cannot be read or parsed.
pub fn load_dir(dir: &Path) -> Result<Vec<Resource>, ManifestError> {
    let io_error = |source| ManifestError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yml" | "yaml")
        );
        if path.is_file() && is_yaml {
            files.push(path);
        }
    }
    files.sort();

    let mut resources = Vec::new();
    for file in files {
        resources.extend(load_file(&file)?);
    }
    Ok(resources)
}

/// Replaces the content of `store` with `dir`. The store is left untouched
/// when any file fails, so a half written file cannot remove objects.
pub fn reload(store: &Store, dir: &Path) -> Result<usize, ManifestError> {
    let resources = load_dir(dir)?;
    Ok(store.replace_all(resources))
}

pub fn load_file(path: &Path) -> Result<Vec<Resource>, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = serde_yaml::Value::deserialize(document).map_err(parse_error)?;
        if value.is_null() {
            continue;
        }
        match value.get("kind").and_then(|kind| kind.as_str()) {
            Some("Ingress" | "Service" | "Secret") => {
                resources.push(serde_yaml::from_value(value).map_err(parse_error)?);
            }
            kind => {
                tracing::debug!(path = %path.display(), ?kind, "Ignoring manifest document");
            }
        }
    }
    Ok(resources)
}

/// Loads `dir` into `store`, then reloads it on every change until `shutdown`
/// is cancelled. A failed reload keeps the previous content.
pub async fn sync_dir(
    store: Arc<Store>,
    dir: PathBuf,
    shutdown: CancellationToken,
) -> Result<(), ManifestError> {
    let mut changes = watch_path(&dir, shutdown.clone())?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            change = changes.recv() => {
                if change.is_none() {
                    return Ok(());
                }
            }
        }

        // Coalesce whatever else is already queued into this reload.
        while changes.try_recv().is_ok() {}

        match reload(&store, &dir) {
            Ok(changed) => {
                tracing::info!(dir = %dir.display(), changed, "Manifests reloaded");
            }
            Err(err) => {
                tracing::error!(error = %err, "Cannot reload manifests, keeping the previous ones");
            }
        }
    }
}
