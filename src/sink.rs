use crate::models::{DataSnapshot, ImportProgress, StructuredError};
use serde::Serialize;
use tokio::sync::mpsc;

/// Where the engine pushes snapshots, errors and import progress.
pub trait EventSink: Send + Sync {
    fn publish_snapshot(&self, snapshot: &DataSnapshot);
    fn emit_error(&self, error: StructuredError);
    fn emit_progress(&self, progress: ImportProgress);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish_snapshot(&self, _snapshot: &DataSnapshot) {}
    fn emit_error(&self, _error: StructuredError) {}
    fn emit_progress(&self, _progress: ImportProgress) {}
}

/// Logs every event; used by the headless host.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish_snapshot(&self, snapshot: &DataSnapshot) {
        tracing::info!(
            contacts = snapshot.contacts.len(),
            servers = snapshot.servers.len(),
            groups = snapshot.groups.len(),
            on_call = snapshot.on_call.len(),
            last_updated = snapshot.last_updated,
            "snapshot published"
        );
    }

    fn emit_error(&self, error: StructuredError) {
        tracing::warn!(
            code = %error.code,
            dataset = ?error.dataset,
            path = ?error.path,
            row = ?error.row,
            "{}",
            error.message
        );
    }

    fn emit_progress(&self, progress: ImportProgress) {
        tracing::debug!(
            dataset = %progress.dataset,
            current = progress.current,
            total = progress.total,
            "import progress"
        );
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum EngineEvent {
    Snapshot(Box<DataSnapshot>),
    Error(StructuredError),
    Progress(ImportProgress),
}

/// Forwards events over a channel, e.g. to the process that owns the UI.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn publish_snapshot(&self, snapshot: &DataSnapshot) {
        let _ = self.sender.send(EngineEvent::Snapshot(Box::new(snapshot.clone())));
    }

    fn emit_error(&self, error: StructuredError) {
        let _ = self.sender.send(EngineEvent::Error(error));
    }

    fn emit_progress(&self, progress: ImportProgress) {
        let _ = self.sender.send(EngineEvent::Progress(progress));
    }
}
