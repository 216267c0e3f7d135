//! Dynamic configuration read from YAML files.
//!
//! `path` is either a single file or a directory whose `*.yml`/`*.yaml` files
//! (recursively) are merged in path order. A file that cannot be read or
//! parsed is logged and contributes nothing.

use crate::watch::{PathEvent, watch_path};
use crate::{ProviderError, Snapshot, Source};
use async_trait::async_trait;
use dynamic::{Configuration, TlsConfiguration, merge_http};
use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const PROVIDER_NAME: &str = "file";

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileProvider {
    path: PathBuf,
    watch: bool,
}

impl FileProvider {
    pub fn new(path: impl Into<PathBuf>, watch: bool) -> Self {
        Self {
            path: path.into(),
            watch,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Builds the configuration from every readable file under `path`.
    pub fn load(&self) -> Configuration {
        let files = if self.path.is_dir() {
            let mut files = Vec::new();
            if let Err(err) = collect_files(&self.path, &mut files) {
                tracing::error!(provider = PROVIDER_NAME, path = %self.path.display(), error = %err, "Cannot list configuration directory");
            }
            files.sort();
            files
        } else {
            vec![self.path.clone()]
        };

        let mut partials = Vec::with_capacity(files.len());
        let mut certificates = Vec::new();
        for file in files {
            match load_file(&file) {
                Ok(configuration) => {
                    tracing::debug!(provider = PROVIDER_NAME, path = %file.display(), "Loaded configuration file");
                    partials.push(configuration.http);
                    if let Some(tls) = configuration.tls {
                        certificates.extend(tls.certificates);
                    }
                }
                Err(err) => {
                    tracing::error!(provider = PROVIDER_NAME, error = %err, "Skipping configuration file");
                }
            }
        }

        Configuration {
            http: merge_http(partials),
            tls: (!certificates.is_empty()).then_some(TlsConfiguration { certificates }),
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml" | "yaml")
    )
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if is_yaml(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn load_file(path: &Path) -> Result<Configuration, LoadError> {
    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(Configuration::new());
    }
    // Enum variants are written as single-key maps (`loadBalancer: {...}`).
    serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(
        &content,
    ))
    .map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl Source for FileProvider {
    type Event = PathEvent;
    type StatusTarget = Infallible;

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn watch(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<PathEvent>, ProviderError> {
        if self.watch {
            return Ok(watch_path(&self.path, shutdown.clone())?);
        }

        // One load, then the stream stays open without further events.
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(PathEvent {
            paths: vec![self.path.clone()],
        });
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tx.closed() => {}
            }
        });
        Ok(rx)
    }

    fn load_configuration(&self) -> Snapshot<Infallible> {
        Snapshot::new(self.load())
    }

    async fn update_status(&self, target: Infallible) -> Result<(), ProviderError> {
        match target {}
    }
}
