pub mod contacts;
pub mod groups;
pub mod oncall;
pub mod servers;

use crate::atomic::read_optional;
use crate::codec::parse_grid;
use crate::datasets::{active_format, json_path, locate_csv, StorageFormat};
use crate::errors::AppResult;
use crate::file_lock::read_json_locked;
use crate::models::{
    Contact, ContactRecord, DatasetKind, Grid, Group, GroupRecord, OnCallRecord, Server, ServerRecord,
    StructuredError,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Result of turning one grid into typed records.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome<T> {
    pub records: Vec<T>,
    pub warnings: Vec<StructuredError>,
    /// Cleaned grid to persist when the source was dirty (legacy headers, preamble,
    /// unnormalized phone numbers).
    pub repaired: Option<Grid>,
}

impl<T> ParseOutcome<T> {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            warnings: Vec::new(),
            repaired: None,
        }
    }
}

/// A canonical rewrite to apply only if the file still holds `original`.
#[derive(Debug, Clone)]
pub struct PendingRewrite {
    pub dataset: DatasetKind,
    pub path: PathBuf,
    pub original: String,
    pub grid: Grid,
}

#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub warnings: Vec<StructuredError>,
    pub rewrite: Option<PendingRewrite>,
}

impl<T> Default for Loaded<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            warnings: Vec::new(),
            rewrite: None,
        }
    }
}

impl<T> Loaded<T> {
    fn from_outcome(
        dataset: DatasetKind,
        path: PathBuf,
        original: String,
        outcome: ParseOutcome<T>,
    ) -> Self {
        let warnings = outcome
            .warnings
            .into_iter()
            .map(|warning| warning.with_path(&path))
            .collect();
        let rewrite = outcome.repaired.map(|grid| PendingRewrite {
            dataset,
            path,
            original,
            grid,
        });
        Self {
            records: outcome.records,
            warnings,
            rewrite,
        }
    }
}

pub fn search_string(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| field.trim())
        .filter(|field| !field.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Header-keyed copy of a row so unknown columns stay reachable.
pub fn raw_row(header: &[String], row: &[String]) -> BTreeMap<String, String> {
    header
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.trim().is_empty())
        .map(|(index, name)| {
            (
                name.trim().to_string(),
                row.get(index).cloned().unwrap_or_default(),
            )
        })
        .collect()
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

async fn read_csv_source(root: &std::path::Path, kind: DatasetKind) -> AppResult<Option<(PathBuf, String)>> {
    let Some(path) = locate_csv(root, kind) else {
        return Ok(None);
    };
    Ok(read_optional(&path).await?.map(|text| (path, text)))
}

pub async fn load_contacts(root: &std::path::Path) -> AppResult<Loaded<Contact>> {
    if active_format(root, DatasetKind::Contacts) == StorageFormat::Json {
        let records = read_json_locked::<Vec<ContactRecord>>(json_path(root, DatasetKind::Contacts))
            .await?
            .unwrap_or_default();
        return Ok(Loaded {
            records: contacts::from_records(&records),
            ..Loaded::default()
        });
    }
    let Some((path, text)) = read_csv_source(root, DatasetKind::Contacts).await? else {
        return Ok(Loaded::default());
    };
    let outcome = contacts::parse_contacts(parse_grid(&text)?);
    Ok(Loaded::from_outcome(DatasetKind::Contacts, path, text, outcome))
}

pub async fn load_servers(root: &std::path::Path) -> AppResult<Loaded<Server>> {
    if active_format(root, DatasetKind::Servers) == StorageFormat::Json {
        let records = read_json_locked::<Vec<ServerRecord>>(json_path(root, DatasetKind::Servers))
            .await?
            .unwrap_or_default();
        return Ok(Loaded {
            records: servers::from_records(&records),
            ..Loaded::default()
        });
    }
    let Some((path, text)) = read_csv_source(root, DatasetKind::Servers).await? else {
        return Ok(Loaded::default());
    };
    let outcome = servers::parse_servers(&text)?;
    Ok(Loaded::from_outcome(DatasetKind::Servers, path, text, outcome))
}

pub async fn load_groups(root: &std::path::Path) -> AppResult<Loaded<Group>> {
    if active_format(root, DatasetKind::Groups) == StorageFormat::Json {
        let records = read_json_locked::<Vec<GroupRecord>>(json_path(root, DatasetKind::Groups))
            .await?
            .unwrap_or_default();
        return Ok(Loaded {
            records: groups::from_records(&records),
            ..Loaded::default()
        });
    }
    let Some((path, text)) = read_csv_source(root, DatasetKind::Groups).await? else {
        return Ok(Loaded::default());
    };
    let outcome = groups::parse_group_grid(&parse_grid(&text)?);
    Ok(Loaded::from_outcome(DatasetKind::Groups, path, text, outcome))
}

pub async fn load_oncall(root: &std::path::Path) -> AppResult<Loaded<OnCallRecord>> {
    if active_format(root, DatasetKind::OnCall) == StorageFormat::Json {
        let records = read_json_locked::<Vec<OnCallRecord>>(json_path(root, DatasetKind::OnCall))
            .await?
            .unwrap_or_default();
        return Ok(Loaded {
            records,
            ..Loaded::default()
        });
    }
    let Some((path, text)) = read_csv_source(root, DatasetKind::OnCall).await? else {
        return Ok(Loaded::default());
    };
    let outcome = oncall::parse_oncall_grid(&parse_grid(&text)?);
    Ok(Loaded::from_outcome(DatasetKind::OnCall, path, text, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_string_skips_blanks_and_lowercases() {
        assert_eq!(search_string(&["Alice ", "", "ALICE@X.COM"]), "alice alice@x.com");
    }

    #[test]
    fn raw_row_tolerates_short_rows() {
        let header = vec!["Name".to_string(), "Extra".to_string(), String::new()];
        let raw = raw_row(&header, &["srv".to_string()]);
        assert_eq!(raw.get("Name").map(String::as_str), Some("srv"));
        assert_eq!(raw.get("Extra").map(String::as_str), Some(""));
        assert_eq!(raw.len(), 2);
    }

    #[tokio::test]
    async fn missing_files_load_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_contacts(dir.path()).await.expect("contacts").records.is_empty());
        assert!(load_servers(dir.path()).await.expect("servers").records.is_empty());
        assert!(load_groups(dir.path()).await.expect("groups").records.is_empty());
        assert!(load_oncall(dir.path()).await.expect("oncall").records.is_empty());
    }

    #[tokio::test]
    async fn json_takes_precedence_over_csv() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("contacts.csv"), "Name,Email\nCsv,csv@a.com\n").expect("csv");
        std::fs::write(
            dir.path().join("contacts.json"),
            r#"[{"id":"c1","name":"Json","email":"json@a.com","createdAt":"2026-01-01T00:00:00Z","updatedAt":"2026-01-01T00:00:00Z"}]"#,
        )
        .expect("json");
        let loaded = load_contacts(dir.path()).await.expect("load");
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].email, "json@a.com");
    }
}
