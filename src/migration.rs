//! One-way conversion of legacy CSV datasets into the JSON record store.
//!
//! A dataset migrates when its CSV exists and its JSON does not. The JSON is written under
//! the cross-process lock and only if it is still absent at that point, so two instances
//! starting together migrate once.

use crate::atomic::read_optional;
use crate::codec::parse_grid;
use crate::datasets::{json_path, locate_csv};
use crate::errors::AppResult;
use crate::file_lock::update_json_locked;
use crate::models::{
    ContactRecord, DatasetKind, GroupRecord, MigrationReport, OnCallRecord, ServerRecord,
};
use crate::operations::MutationContext;
use crate::parsers::contacts::parse_contacts;
use crate::parsers::groups::parse_group_grid;
use crate::parsers::oncall::parse_oncall_grid;
use crate::parsers::servers::parse_servers;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

pub fn needs_migration(root: &Path, kind: DatasetKind) -> bool {
    locate_csv(root, kind).is_some() && !json_path(root, kind).exists()
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn to_values<T: Serialize>(records: Vec<T>) -> AppResult<Vec<Value>> {
    records
        .into_iter()
        .map(|record| serde_json::to_value(record).map_err(Into::into))
        .collect()
}

/// Converts the legacy CSV of one dataset into JSON records. Every non-blank row becomes a
/// record; rows the parsers only warn about are carried over as they are.
fn convert(kind: DatasetKind, text: &str) -> AppResult<Vec<Value>> {
    let now = Utc::now();
    match kind {
        DatasetKind::Contacts => {
            let outcome = parse_contacts(parse_grid(text)?);
            to_values(
                outcome
                    .records
                    .into_iter()
                    .map(|contact| ContactRecord {
                        id: new_id(),
                        name: contact.name,
                        email: contact.email,
                        phone: contact.phone,
                        title: contact.title,
                        created_at: now,
                        updated_at: now,
                    })
                    .collect(),
            )
        }
        DatasetKind::Servers => {
            let outcome = parse_servers(text)?;
            to_values(
                outcome
                    .records
                    .into_iter()
                    .map(|server| ServerRecord {
                        id: new_id(),
                        name: server.name,
                        business_area: server.business_area,
                        lob: server.lob,
                        comment: server.comment,
                        owner: server.owner,
                        contact: server.contact,
                        os: server.os,
                        created_at: now,
                        updated_at: now,
                    })
                    .collect(),
            )
        }
        DatasetKind::Groups => {
            let outcome = parse_group_grid(&parse_grid(text)?);
            to_values(
                outcome
                    .records
                    .into_iter()
                    .map(|group| GroupRecord {
                        id: new_id(),
                        name: group.name,
                        contacts: group.members,
                        created_at: now,
                        updated_at: now,
                    })
                    .collect(),
            )
        }
        DatasetKind::OnCall => {
            let outcome = parse_oncall_grid(&parse_grid(text)?);
            to_values(
                outcome
                    .records
                    .into_iter()
                    .map(|record| OnCallRecord {
                        id: new_id(),
                        ..record
                    })
                    .collect(),
            )
        }
    }
}

/// Migrates one dataset. `Ok(false)` when there was nothing to do. Engine callers go
/// through [`MutationContext::migrate`] so the read and the write share the dataset's
/// write slot.
pub async fn migrate_dataset(root: &Path, kind: DatasetKind) -> AppResult<bool> {
    if !needs_migration(root, kind) {
        return Ok(false);
    }
    let Some(csv) = locate_csv(root, kind) else {
        return Ok(false);
    };
    let Some(text) = read_optional(&csv).await? else {
        return Ok(false);
    };
    let records = convert(kind, &text)?;
    let count = records.len();

    let written = update_json_locked(json_path(root, kind), move |current: Option<Value>| {
        if current.is_some() {
            return Ok((None, false));
        }
        Ok((Some(Value::Array(records)), true))
    })
    .await?;

    if written {
        tracing::info!(dataset = %kind, source = %csv.to_string_lossy(), records = count, "dataset migrated to json");
    }
    Ok(written)
}

/// Migrates every dataset that needs it. Failures are reported per dataset; the CSV stays
/// authoritative for any dataset that failed.
pub async fn migrate_all(ctx: &MutationContext) -> MigrationReport {
    let mut report = MigrationReport::default();
    for kind in DatasetKind::ALL {
        match ctx.migrate(kind).await {
            Ok(true) => report.migrated.push(kind),
            Ok(false) => report.skipped.push(kind),
            Err(error) => {
                tracing::warn!(dataset = %kind, error = %error, "migration failed");
                report.failed.push((kind, error.to_string()));
            }
        }
    }
    report
}
