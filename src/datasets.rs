use crate::models::DatasetKind;
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = "settings.json";
pub const BACKUP_DIR: &str = "backups";

const CONTACT_CSV: &[&str] = &["contacts.csv", "Contacts.csv"];
const SERVER_CSV: &[&str] = &["servers.csv", "Servers.csv"];
const GROUP_CSV: &[&str] = &["groups.csv", "Groups.csv"];
const ONCALL_CSV: &[&str] = &["oncall.csv", "on-call.csv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    Csv,
    Json,
}

pub fn csv_candidates(kind: DatasetKind) -> &'static [&'static str] {
    match kind {
        DatasetKind::Contacts => CONTACT_CSV,
        DatasetKind::Servers => SERVER_CSV,
        DatasetKind::Groups => GROUP_CSV,
        DatasetKind::OnCall => ONCALL_CSV,
    }
}

pub fn json_filename(kind: DatasetKind) -> &'static str {
    match kind {
        DatasetKind::Contacts => "contacts.json",
        DatasetKind::Servers => "servers.json",
        DatasetKind::Groups => "groups.json",
        DatasetKind::OnCall => "oncall.json",
    }
}

/// First candidate CSV that exists on disk.
pub fn locate_csv(root: &Path, kind: DatasetKind) -> Option<PathBuf> {
    csv_candidates(kind)
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Existing CSV path, or where a new one should be created.
pub fn csv_path(root: &Path, kind: DatasetKind) -> PathBuf {
    locate_csv(root, kind).unwrap_or_else(|| root.join(csv_candidates(kind)[0]))
}

pub fn json_path(root: &Path, kind: DatasetKind) -> PathBuf {
    root.join(json_filename(kind))
}

pub fn active_format(root: &Path, kind: DatasetKind) -> StorageFormat {
    if json_path(root, kind).is_file() {
        StorageFormat::Json
    } else {
        StorageFormat::Csv
    }
}

/// Editor swap files, office lock files, our own staging and lock siblings.
pub fn is_transient(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("~$")
        || lower.starts_with(".~lock")
        || lower.starts_with('.')
        || lower.ends_with('~')
        || [".tmp", ".lock", ".swp", ".swx", ".bak", ".part", ".crdownload"]
            .iter()
            .any(|suffix| lower.ends_with(suffix))
}

/// Maps a bare filename to the dataset it backs, ignoring case.
pub fn classify_filename(name: &str) -> Option<DatasetKind> {
    if is_transient(name) {
        return None;
    }
    let lower = name.to_lowercase();
    DatasetKind::ALL.into_iter().find(|kind| {
        json_filename(*kind) == lower
            || csv_candidates(*kind)
                .iter()
                .any(|candidate| candidate.to_lowercase() == lower)
    })
}

/// Every filename a backup should try to copy.
pub fn backup_filenames() -> Vec<&'static str> {
    let mut names = Vec::new();
    for kind in DatasetKind::ALL {
        names.extend_from_slice(csv_candidates(kind));
        names.push(json_filename(kind));
    }
    names.push(SETTINGS_FILE);
    names
}
