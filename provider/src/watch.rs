//! Filesystem change notifications shared by the file based providers.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Paths touched by one filesystem change. The first event of every watch is
/// synthetic and names the watched path itself, so the initial state is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct PathEvent {
    pub paths: Vec<PathBuf>,
}

/// Watches `path` recursively until `shutdown` is cancelled or the returned
/// receiver is dropped.
pub fn watch_path(
    path: &Path,
    shutdown: CancellationToken,
) -> Result<mpsc::UnboundedReceiver<PathEvent>, notify::Error> {
    let (tx, rx) = mpsc::unbounded_channel();

    let callback_tx = tx.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove() {
                    let _ = callback_tx.send(PathEvent { paths: event.paths });
                }
            }
            Err(err) => tracing::error!(error = %err, "Filesystem watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(path, RecursiveMode::Recursive)?;

    let _ = tx.send(PathEvent {
        paths: vec![path.to_path_buf()],
    });

    // The watcher stops when dropped, so it lives in this task.
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tx.closed() => {}
        }
        drop(watcher);
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_initial_event_and_change() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let mut events = watch_path(dir.path(), shutdown.clone()).unwrap();

        let initial = events.recv().await.unwrap();
        assert_eq!(initial.paths, vec![dir.path().to_path_buf()]);

        std::fs::write(dir.path().join("routes.yaml"), "http: {}").unwrap();
        let changed = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("a change notification")
            .unwrap();
        assert!(!changed.paths.is_empty());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(watch_path(&missing, CancellationToken::new()).is_err());
    }
}
