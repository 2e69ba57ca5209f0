use crate::atomic::{read_optional, write_csv_atomic};
use crate::backup::BackupManager;
use crate::cache::SnapshotCache;
use crate::codec::encode_grid;
use crate::datasets::SETTINGS_FILE;
use crate::errors::{AppError, AppResult};
use crate::migration::{migrate_all, needs_migration};
use crate::models::{
    ContactInput, DataSnapshot, DatasetKind, EngineSettings, ImportOutcome, MigrationReport,
    OnCallInput, OnCallRecord, ServerInput, StructuredError,
};
use crate::operations::{contacts, groups, oncall, servers, MutationContext};
use crate::parsers::PendingRewrite;
use crate::sink::EventSink;
use crate::watcher::ChangeWatcher;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::task::JoinHandle;

/// Owns every piece of engine state. Hosts create one per data root and drive it through
/// the mutation methods; snapshots, errors and progress flow out through the sink.
pub struct DataEngine {
    root: PathBuf,
    settings: EngineSettings,
    sink: Arc<dyn EventSink>,
    mutations: MutationContext,
    cache: SnapshotCache,
    backups: BackupManager,
    watcher: StdMutex<Option<ChangeWatcher>>,
    backup_loop: StdMutex<Option<JoinHandle<()>>>,
}

impl DataEngine {
    pub fn new(root: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> AppResult<Arc<Self>> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|error| AppError::Io(format!("create {}: {}", root.to_string_lossy(), error)))?;
        let settings = load_settings(&root);

        Ok(Arc::new(Self {
            mutations: MutationContext::new(root.clone(), sink.clone()),
            cache: SnapshotCache::new(),
            backups: BackupManager::new(root.clone()),
            watcher: StdMutex::new(None),
            backup_loop: StdMutex::new(None),
            settings,
            sink,
            root,
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn snapshot(&self) -> DataSnapshot {
        self.cache.snapshot().await
    }

    /// Migrates, backs up, loads and publishes, then starts watching and the backup
    /// schedule. Each step is governed by its setting.
    pub async fn start(self: &Arc<Self>) -> AppResult<MigrationReport> {
        let report = if self.settings.migrate_on_start {
            self.migrate().await
        } else {
            MigrationReport::default()
        };

        if self.settings.backup_on_start {
            if let Err(error) = self.backups.backup_now(Some("start")).await {
                tracing::warn!(error = %error, "startup backup failed");
            }
        }

        self.reload_all().await;

        if self.settings.watch {
            let suppression = self.mutations.suppression.clone();
            let weak = Arc::downgrade(self);
            let watcher = ChangeWatcher::start(
                &self.root,
                move || suppression.is_active(),
                move |kinds| {
                    let weak = weak.clone();
                    tokio::spawn(async move {
                        if let Some(engine) = weak.upgrade() {
                            engine.reload_datasets(kinds).await;
                        }
                    });
                },
            )?;
            *lock(&self.watcher) = Some(watcher);
        }

        if self.settings.backup_interval_minutes > 0 {
            *lock(&self.backup_loop) = Some(self.spawn_backup_loop());
        }

        tracing::info!(root = %self.root.to_string_lossy(), "data engine started");
        Ok(report)
    }

    fn spawn_backup_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = std::time::Duration::from_secs(self.settings.backup_interval_minutes * 60);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick is immediate and the start backup already ran.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                if let Err(error) = engine.backups.backup_now(Some("scheduled")).await {
                    tracing::warn!(error = %error, "scheduled backup failed");
                }
            }
        })
    }

    pub fn shutdown(&self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.stop();
        }
        if let Some(task) = lock(&self.backup_loop).take() {
            task.abort();
        }
        tracing::info!(root = %self.root.to_string_lossy(), "data engine stopped");
    }

    pub fn needs_migration(&self, kind: DatasetKind) -> bool {
        needs_migration(&self.root, kind)
    }

    pub async fn migrate(&self) -> MigrationReport {
        let report = migrate_all(&self.mutations).await;
        for (kind, message) in &report.failed {
            self.sink
                .emit_error(StructuredError::new("MIGRATION_FAILED", Some(*kind), message.clone()));
        }
        report
    }

    pub async fn backup_now(&self, tag: Option<&str>) -> AppResult<PathBuf> {
        self.backups.backup_now(tag).await
    }

    pub async fn reload_all(&self) -> DataSnapshot {
        self.reload_datasets(DatasetKind::ALL.into_iter().collect()).await
    }

    /// Re-parses `kinds`, reports warnings and failures, schedules canonical rewrites of
    /// dirty files, and publishes the result.
    pub async fn reload_datasets(&self, kinds: BTreeSet<DatasetKind>) -> DataSnapshot {
        let outcome = self.cache.reload(&self.root, &kinds).await;
        for error in outcome.errors {
            self.sink.emit_error(error);
        }
        for rewrite in outcome.rewrites {
            let mutations = self.mutations.clone();
            tokio::spawn(async move {
                let path = rewrite.path.clone();
                if let Err(error) = apply_rewrite(&mutations, rewrite).await {
                    tracing::warn!(path = %path.to_string_lossy(), error = %error, "canonical rewrite failed");
                }
            });
        }
        self.sink.publish_snapshot(&outcome.snapshot);
        outcome.snapshot
    }

    async fn after_mutation(&self, kind: DatasetKind, operation: &str, changed: bool) {
        if !changed {
            return;
        }
        self.reload_datasets([kind].into_iter().collect()).await;
        if self.settings.backup_after_mutation {
            if let Err(error) = self.backups.backup_now(Some(operation)).await {
                tracing::warn!(operation, error = %error, "post-mutation backup failed");
            }
        }
    }

    pub async fn add_contact(&self, input: ContactInput) -> AppResult<bool> {
        let changed = contacts::add_contact(&self.mutations, input).await?;
        self.after_mutation(DatasetKind::Contacts, "add_contact", changed).await;
        Ok(changed)
    }

    pub async fn remove_contact(&self, email: &str) -> AppResult<bool> {
        let changed = contacts::remove_contact(&self.mutations, email).await?;
        self.after_mutation(DatasetKind::Contacts, "remove_contact", changed).await;
        Ok(changed)
    }

    pub async fn import_contacts(&self, inputs: Vec<ContactInput>) -> AppResult<ImportOutcome> {
        let outcome = contacts::import_contacts(&self.mutations, inputs).await?;
        self.after_mutation(DatasetKind::Contacts, "import_contacts", changed(&outcome)).await;
        Ok(outcome)
    }

    pub async fn import_contacts_file(&self, source: &Path) -> AppResult<ImportOutcome> {
        let outcome = contacts::import_contacts_file(&self.mutations, source).await?;
        self.after_mutation(DatasetKind::Contacts, "import_contacts", changed(&outcome)).await;
        Ok(outcome)
    }

    pub async fn add_server(&self, input: ServerInput) -> AppResult<bool> {
        let changed = servers::add_server(&self.mutations, input).await?;
        self.after_mutation(DatasetKind::Servers, "add_server", changed).await;
        Ok(changed)
    }

    pub async fn remove_server(&self, name: &str) -> AppResult<bool> {
        let changed = servers::remove_server(&self.mutations, name).await?;
        self.after_mutation(DatasetKind::Servers, "remove_server", changed).await;
        Ok(changed)
    }

    pub async fn import_servers(&self, inputs: Vec<ServerInput>) -> AppResult<ImportOutcome> {
        let outcome = servers::import_servers(&self.mutations, inputs).await?;
        self.after_mutation(DatasetKind::Servers, "import_servers", changed(&outcome)).await;
        Ok(outcome)
    }

    pub async fn import_servers_file(&self, source: &Path) -> AppResult<ImportOutcome> {
        let outcome = servers::import_servers_file(&self.mutations, source).await?;
        self.after_mutation(DatasetKind::Servers, "import_servers", changed(&outcome)).await;
        Ok(outcome)
    }

    pub async fn add_group(&self, name: &str) -> AppResult<bool> {
        let changed = groups::add_group(&self.mutations, name).await?;
        self.after_mutation(DatasetKind::Groups, "add_group", changed).await;
        Ok(changed)
    }

    pub async fn remove_group(&self, name: &str) -> AppResult<bool> {
        let changed = groups::remove_group(&self.mutations, name).await?;
        self.after_mutation(DatasetKind::Groups, "remove_group", changed).await;
        Ok(changed)
    }

    pub async fn rename_group(&self, from: &str, to: &str) -> AppResult<bool> {
        let changed = groups::rename_group(&self.mutations, from, to).await?;
        self.after_mutation(DatasetKind::Groups, "rename_group", changed).await;
        Ok(changed)
    }

    pub async fn add_group_member(&self, group: &str, email: &str) -> AppResult<bool> {
        let changed = groups::add_group_member(&self.mutations, group, email).await?;
        self.after_mutation(DatasetKind::Groups, "add_group_member", changed).await;
        Ok(changed)
    }

    pub async fn remove_group_member(&self, group: &str, email: &str) -> AppResult<bool> {
        let changed = groups::remove_group_member(&self.mutations, group, email).await?;
        self.after_mutation(DatasetKind::Groups, "remove_group_member", changed).await;
        Ok(changed)
    }

    pub async fn set_group_members(&self, group: &str, members: Vec<String>) -> AppResult<bool> {
        let changed = groups::set_group_members(&self.mutations, group, members).await?;
        self.after_mutation(DatasetKind::Groups, "set_group_members", changed).await;
        Ok(changed)
    }

    pub async fn add_oncall_record(&self, input: OnCallInput) -> AppResult<OnCallRecord> {
        let record = oncall::add_oncall_record(&self.mutations, input).await?;
        self.after_mutation(DatasetKind::OnCall, "add_oncall_record", true).await;
        Ok(record)
    }

    pub async fn remove_oncall_record(&self, id: &str) -> AppResult<bool> {
        let changed = oncall::remove_oncall_record(&self.mutations, id).await?;
        self.after_mutation(DatasetKind::OnCall, "remove_oncall_record", changed).await;
        Ok(changed)
    }

    pub async fn update_oncall_team(&self, team: &str, rows: Vec<OnCallInput>) -> AppResult<bool> {
        let changed = oncall::update_oncall_team(&self.mutations, team, rows).await?;
        self.after_mutation(DatasetKind::OnCall, "update_oncall_team", changed).await;
        Ok(changed)
    }

    pub async fn remove_oncall_team(&self, team: &str) -> AppResult<bool> {
        let changed = oncall::remove_oncall_team(&self.mutations, team).await?;
        self.after_mutation(DatasetKind::OnCall, "remove_oncall_team", changed).await;
        Ok(changed)
    }

    pub async fn rename_oncall_team(&self, from: &str, to: &str) -> AppResult<bool> {
        let changed = oncall::rename_oncall_team(&self.mutations, from, to).await?;
        self.after_mutation(DatasetKind::OnCall, "rename_oncall_team", changed).await;
        Ok(changed)
    }

    pub async fn import_oncall(&self, inputs: Vec<OnCallInput>) -> AppResult<ImportOutcome> {
        let outcome = oncall::import_oncall(&self.mutations, inputs).await?;
        self.after_mutation(DatasetKind::OnCall, "import_oncall", changed(&outcome)).await;
        Ok(outcome)
    }
}

fn changed(outcome: &ImportOutcome) -> bool {
    outcome.added + outcome.updated > 0
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Missing settings mean defaults; unreadable or malformed ones are logged and ignored.
pub fn load_settings(root: &Path) -> EngineSettings {
    let path = root.join(SETTINGS_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(text.trim_start_matches('\u{feff}')).unwrap_or_else(|error| {
            tracing::warn!(path = %path.to_string_lossy(), error = %error, "invalid settings file, using defaults");
            EngineSettings::default()
        }),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => EngineSettings::default(),
        Err(error) => {
            tracing::warn!(path = %path.to_string_lossy(), error = %error, "failed to read settings, using defaults");
            EngineSettings::default()
        }
    }
}

/// Writes the cleaned grid back, unless the file changed since it was parsed.
async fn apply_rewrite(ctx: &MutationContext, rewrite: PendingRewrite) -> AppResult<bool> {
    let PendingRewrite {
        dataset,
        path,
        original,
        grid,
    } = rewrite;
    ctx.serialized(dataset, || async {
        if read_optional(&path).await?.as_deref() != Some(original.as_str()) {
            tracing::debug!(dataset = %dataset, path = %path.to_string_lossy(), "file changed before rewrite, skipping");
            return Ok(false);
        }
        write_csv_atomic(&path, &encode_grid(&grid)?).await?;
        tracing::info!(dataset = %dataset, path = %path.to_string_lossy(), "rewrote file with canonical headers");
        Ok(true)
    })
    .await
}
