use super::{require, rewrite_json, MutationContext};
use crate::datasets::json_path;
use crate::errors::AppResult;
use crate::migration::migrate_dataset;
use crate::models::{oncall_identity, DatasetKind, ImportOutcome, OnCallInput, OnCallRecord};
use std::collections::HashMap;
use uuid::Uuid;

/// On-call edits always go to the JSON store. A legacy roster is migrated first, in the
/// same write slot as the edit.
async fn edit_roster<R, F>(ctx: &MutationContext, edit: F) -> AppResult<R>
where
    R: Send + 'static,
    F: FnOnce(&mut Vec<OnCallRecord>) -> (bool, R) + Send + 'static,
{
    ctx.serialized(DatasetKind::OnCall, || async move {
        migrate_dataset(&ctx.root, DatasetKind::OnCall).await?;
        rewrite_json(json_path(&ctx.root, DatasetKind::OnCall), move |mut records: Vec<OnCallRecord>| {
            let (changed, result) = edit(&mut records);
            Ok((changed.then_some(records), result))
        })
        .await
    })
    .await
}

fn validated(input: &OnCallInput) -> AppResult<OnCallInput> {
    Ok(OnCallInput {
        team: require(&input.team, "on-call team")?,
        role: input.role.trim().to_string(),
        name: require(&input.name, "on-call name")?,
        contact: input.contact.as_deref().map(|value| value.trim().to_string()),
        time_window: input.time_window.as_deref().map(|value| value.trim().to_string()),
    })
}

fn apply(record: &mut OnCallRecord, input: &OnCallInput) {
    if let Some(contact) = &input.contact {
        record.contact = contact.clone();
    }
    if let Some(time_window) = &input.time_window {
        record.time_window = time_window.clone();
    }
}

fn new_record(input: &OnCallInput) -> OnCallRecord {
    OnCallRecord {
        id: Uuid::new_v4().to_string(),
        team: input.team.clone(),
        role: input.role.clone(),
        name: input.name.clone(),
        contact: input.contact.clone().unwrap_or_default(),
        time_window: input.time_window.clone().unwrap_or_default(),
    }
}

fn same_team(record: &OnCallRecord, team: &str) -> bool {
    record.team.trim().eq_ignore_ascii_case(team.trim())
}

/// Adds a roster row, or updates contact and time window of the row with the same
/// team, role and name. Returns the stored record.
pub async fn add_oncall_record(ctx: &MutationContext, input: OnCallInput) -> AppResult<OnCallRecord> {
    let input = validated(&input)?;
    edit_roster(ctx, move |records| {
        let identity = oncall_identity(&input.team, &input.role, &input.name);
        let stored = match records.iter_mut().find(|record| record.identity() == identity) {
            Some(record) => {
                apply(record, &input);
                record.clone()
            }
            None => {
                let record = new_record(&input);
                records.push(record.clone());
                record
            }
        };
        (true, stored)
    })
    .await
}

pub async fn remove_oncall_record(ctx: &MutationContext, id: &str) -> AppResult<bool> {
    let id = id.trim().to_string();
    edit_roster(ctx, move |records| {
        let before = records.len();
        records.retain(|record| record.id != id);
        let removed = records.len() != before;
        (removed, removed)
    })
    .await
}

/// Replaces every row of `team` with `rows`, keeping the team's place in the roster.
/// Rows that match an existing identity keep its id.
pub async fn update_oncall_team(ctx: &MutationContext, team: &str, rows: Vec<OnCallInput>) -> AppResult<bool> {
    let team = require(team, "on-call team")?;
    let rows = rows
        .into_iter()
        .map(|row| validated(&OnCallInput { team: team.clone(), ..row }))
        .collect::<AppResult<Vec<_>>>()?;
    edit_roster(ctx, move |records| {
        let position = records
            .iter()
            .position(|record| same_team(record, &team))
            .unwrap_or(records.len());
        let previous_ids = records
            .iter()
            .filter(|record| same_team(record, &team))
            .map(|record| (record.identity(), record.id.clone()))
            .collect::<HashMap<_, _>>();
        records.retain(|record| !same_team(record, &team));

        let replacement = rows.iter().map(|row| {
            let mut record = new_record(row);
            if let Some(id) = previous_ids.get(&record.identity()) {
                record.id = id.clone();
            }
            record
        });
        let tail = records.split_off(position.min(records.len()));
        records.extend(replacement);
        records.extend(tail);
        (true, true)
    })
    .await
}

pub async fn remove_oncall_team(ctx: &MutationContext, team: &str) -> AppResult<bool> {
    let team = team.trim().to_string();
    edit_roster(ctx, move |records| {
        let before = records.len();
        records.retain(|record| !same_team(record, &team));
        let removed = records.len() != before;
        (removed, removed)
    })
    .await
}

pub async fn rename_oncall_team(ctx: &MutationContext, from: &str, to: &str) -> AppResult<bool> {
    let from = from.trim().to_string();
    let to = require(to, "on-call team")?;
    edit_roster(ctx, move |records| {
        let mut renamed = false;
        for record in records.iter_mut().filter(|record| same_team(record, &from)) {
            record.team = to.clone();
            renamed = true;
        }
        (renamed, renamed)
    })
    .await
}

/// Bulk upsert keyed by case-insensitive (team, role, name). Rows missing a team or a
/// name are skipped.
pub async fn import_oncall(ctx: &MutationContext, inputs: Vec<OnCallInput>) -> AppResult<ImportOutcome> {
    let worker = ctx.clone();
    let outcome = edit_roster(ctx, move |records| {
        let mut index = records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.identity(), position))
            .collect::<HashMap<_, _>>();
        let mut outcome = ImportOutcome::default();
        let total = inputs.len();
        for (position, input) in inputs.iter().enumerate() {
            match validated(input) {
                Err(_) => outcome.skipped += 1,
                Ok(input) => {
                    let identity = oncall_identity(&input.team, &input.role, &input.name);
                    match index.get(&identity) {
                        Some(&existing) => {
                            apply(&mut records[existing], &input);
                            outcome.updated += 1;
                        }
                        None => {
                            records.push(new_record(&input));
                            index.insert(identity, records.len() - 1);
                            outcome.added += 1;
                        }
                    }
                }
            }
            worker.report_progress(DatasetKind::OnCall, position + 1, total);
        }
        (outcome.added + outcome.updated > 0, outcome)
    })
    .await?;
    tracing::info!(
        added = outcome.added,
        updated = outcome.updated,
        skipped = outcome.skipped,
        "on-call roster imported"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImportProgress;
    use crate::operations::test_support::context;
    use crate::sink::EventSink;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    fn row(team: &str, role: &str, name: &str) -> OnCallInput {
        OnCallInput {
            team: team.to_string(),
            role: role.to_string(),
            name: name.to_string(),
            ..OnCallInput::default()
        }
    }

    fn roster(root: &Path) -> Vec<OnCallRecord> {
        serde_json::from_str(&std::fs::read_to_string(root.join("oncall.json")).expect("read")).expect("json")
    }

    #[derive(Default)]
    struct ProgressLog(Mutex<Vec<ImportProgress>>);

    impl EventSink for ProgressLog {
        fn publish_snapshot(&self, _snapshot: &crate::models::DataSnapshot) {}
        fn emit_error(&self, _error: crate::models::StructuredError) {}
        fn emit_progress(&self, progress: ImportProgress) {
            self.0.lock().expect("progress lock").push(progress);
        }
    }

    #[tokio::test]
    async fn first_edit_migrates_legacy_roster() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("oncall.csv"), "Team,Role,Name\nNet,Primary,Alice\n").expect("csv");
        let ctx = context(dir.path());
        let stored = add_oncall_record(&ctx, row("DB", "Primary", "Cara")).await.expect("add");
        let records = roster(dir.path());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Alice");
        assert_eq!(records[1], stored);
    }

    #[tokio::test]
    async fn add_upserts_by_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path());
        let first = add_oncall_record(&ctx, row("Net", "Primary", "Alice")).await.expect("add");
        let again = add_oncall_record(
            &ctx,
            OnCallInput {
                contact: Some("555".to_string()),
                ..row("NET", "primary", "alice")
            },
        )
        .await
        .expect("upsert");
        assert_eq!(first.id, again.id);
        assert_eq!(roster(dir.path()).len(), 1);
        assert_eq!(roster(dir.path())[0].contact, "555");
        assert!(add_oncall_record(&ctx, row("", "x", "y")).await.is_err());
    }

    #[tokio::test]
    async fn team_replacement_keeps_position_and_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path());
        for (team, name) in [("A", "a1"), ("B", "b1"), ("B", "b2"), ("C", "c1")] {
            add_oncall_record(&ctx, row(team, "", name)).await.expect("seed");
        }
        let b1 = roster(dir.path())[1].id.clone();
        assert!(update_oncall_team(&ctx, "b", vec![row("ignored", "", "b1"), row("", "", "b3")])
            .await
            .expect("update"));
        let names = roster(dir.path()).into_iter().map(|record| record.name).collect::<Vec<_>>();
        assert_eq!(names, vec!["a1", "b1", "b3", "c1"]);
        let records = roster(dir.path());
        assert_eq!(records[1].id, b1);
        assert_eq!(records[2].team, "b");

        assert!(rename_oncall_team(&ctx, "B", "Bravo").await.expect("rename"));
        assert!(!rename_oncall_team(&ctx, "missing", "x").await.expect("rename"));
        assert!(remove_oncall_team(&ctx, "bravo").await.expect("remove"));
        assert_eq!(roster(dir.path()).len(), 2);
        let id = roster(dir.path())[0].id.clone();
        assert!(remove_oncall_record(&ctx, &id).await.expect("remove"));
        assert!(!remove_oncall_record(&ctx, &id).await.expect("again"));
    }

    #[tokio::test]
    async fn import_reports_progress_and_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = Arc::new(ProgressLog::default());
        let mut ctx = context(dir.path());
        ctx.sink = log.clone();
        add_oncall_record(&ctx, row("Net", "Primary", "Alice")).await.expect("seed");

        let mut inputs = (0..150).map(|n| row("Ops", "Backup", &format!("p{n}"))).collect::<Vec<_>>();
        inputs.push(row("net", "PRIMARY", "ALICE"));
        inputs.push(row("Ops", "Backup", ""));
        let outcome = import_oncall(&ctx, inputs).await.expect("import");
        assert_eq!(outcome, ImportOutcome { added: 150, updated: 1, skipped: 1 });

        let progress = log.0.lock().expect("progress lock").clone();
        assert_eq!(progress.iter().map(|p| p.current).collect::<Vec<_>>(), vec![100, 152]);
        assert!(progress.iter().all(|p| p.total == 152 && p.dataset == DatasetKind::OnCall));
    }
}
