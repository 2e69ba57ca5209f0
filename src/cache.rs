use crate::errors::{AppError, AppResult};
use crate::models::{DataSnapshot, DatasetKind, StructuredError};
use crate::parsers::{load_contacts, load_groups, load_oncall, load_servers, Loaded, PendingRewrite};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::sync::{Mutex, RwLock};

/// What a reload produced besides the new snapshot.
#[derive(Debug, Clone, Default)]
pub struct ReloadOutcome {
    pub snapshot: DataSnapshot,
    pub errors: Vec<StructuredError>,
    pub rewrites: Vec<PendingRewrite>,
}

/// Last parsed view of every dataset.
#[derive(Default)]
pub struct SnapshotCache {
    snapshot: RwLock<DataSnapshot>,
    // Keeps reloads in order so an older read never lands after a newer one.
    reload_gate: Mutex<()>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> DataSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Re-reads only `kinds`; the other datasets keep their cached values.
    pub async fn reload(&self, root: &Path, kinds: &BTreeSet<DatasetKind>) -> ReloadOutcome {
        let _turn = self.reload_gate.lock().await;
        let mut outcome = ReloadOutcome::default();
        let mut next = self.snapshot.read().await.clone();

        for kind in kinds {
            match kind {
                DatasetKind::Contacts => {
                    settle(*kind, load_contacts(root).await, &mut next.contacts, &mut outcome)
                }
                DatasetKind::Servers => {
                    settle(*kind, load_servers(root).await, &mut next.servers, &mut outcome)
                }
                DatasetKind::Groups => {
                    settle(*kind, load_groups(root).await, &mut next.groups, &mut outcome)
                }
                DatasetKind::OnCall => {
                    settle(*kind, load_oncall(root).await, &mut next.on_call, &mut outcome)
                }
            }
        }

        next.last_updated = Utc::now().timestamp_millis();
        *self.snapshot.write().await = next.clone();
        tracing::debug!(
            datasets = ?kinds,
            errors = outcome.errors.len(),
            rewrites = outcome.rewrites.len(),
            "snapshot reloaded"
        );
        outcome.snapshot = next;
        outcome
    }
}

/// Folds one dataset's load result into the snapshot. Malformed content empties the
/// dataset; any other failure keeps what was cached so a flaky read never looks like
/// deleted data.
fn settle<T>(kind: DatasetKind, result: AppResult<Loaded<T>>, slot: &mut Vec<T>, outcome: &mut ReloadOutcome) {
    match result {
        Ok(loaded) => {
            *slot = loaded.records;
            outcome.errors.extend(loaded.warnings);
            outcome.rewrites.extend(loaded.rewrite);
        }
        Err(error) => {
            tracing::warn!(dataset = %kind, error = %error, "dataset reload failed");
            if matches!(error, AppError::Parse(_)) {
                slot.clear();
            }
            outcome
                .errors
                .push(StructuredError::new(error.code(), Some(kind), error.to_string()));
        }
    }
}
