//! Data-root watcher.
//!
//! notify delivers raw events on its own thread; we forward bare filenames over a channel
//! into a tokio task that classifies them, drops echoes of our own writes, and fires one
//! callback per burst once the directory has been quiet for [`DEBOUNCE`].

use crate::datasets::classify_filename;
use crate::errors::AppResult;
use crate::models::DatasetKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEBOUNCE: Duration = Duration::from_millis(150);

fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

/// Keeps the OS watcher and its debounce task alive; both stop when this is dropped.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    /// Starts watching `root` (non-recursively). Must be called inside a tokio runtime.
    pub fn start<I, C>(root: &Path, should_ignore: I, on_change: C) -> AppResult<Self>
    where
        I: Fn() -> bool + Send + 'static,
        C: Fn(BTreeSet<DatasetKind>) + Send + 'static,
    {
        let (names_tx, names_rx) = mpsc::unbounded_channel::<String>();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) if is_relevant(&event.kind) => {
                    for path in &event.paths {
                        if let Some(name) = path.file_name() {
                            let _ = names_tx.send(name.to_string_lossy().to_string());
                        }
                    }
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(error = %error, "file watcher error"),
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::NonRecursive)?;
        tracing::info!(root = %root.to_string_lossy(), "watching data root");

        let task = tokio::spawn(debounce_loop(names_rx, DEBOUNCE, should_ignore, on_change));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Coalesces filenames into dataset sets. Each matching name pushes the deadline out by
/// `window`; when it passes, `on_change` gets the union and the set starts over. Names
/// arriving while `should_ignore` is true are dropped. Ends when the sender side closes.
pub async fn debounce_loop<I, C>(
    mut names: mpsc::UnboundedReceiver<String>,
    window: Duration,
    should_ignore: I,
    on_change: C,
) where
    I: Fn() -> bool,
    C: Fn(BTreeSet<DatasetKind>),
{
    let mut pending = BTreeSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            received = names.recv() => {
                let Some(name) = received else {
                    break;
                };
                let Some(kind) = classify_filename(&name) else {
                    continue;
                };
                if should_ignore() {
                    tracing::trace!(file = %name, "ignoring change during engine write");
                    continue;
                }
                pending.insert(kind);
                deadline = Some(Instant::now() + window);
            }
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                deadline = None;
                let changed = std::mem::take(&mut pending);
                if !changed.is_empty() {
                    tracing::debug!(datasets = ?changed, "external change detected");
                    on_change(changed);
                }
            }
        }
    }
}
