use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row-major text matrix backing a CSV dataset. Row 0 is the header when present.
pub type Grid = Vec<Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    Contacts,
    Servers,
    Groups,
    OnCall,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 4] = [Self::Contacts, Self::Servers, Self::Groups, Self::OnCall];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Servers => "servers",
            Self::Groups => "groups",
            Self::OnCall => "on-call",
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub title: String,
    #[serde(rename = "_searchString")]
    pub search_string: String,
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub name: String,
    pub business_area: String,
    pub lob: String,
    pub comment: String,
    pub owner: String,
    pub contact: String,
    pub os: String,
    #[serde(rename = "_searchString")]
    pub search_string: String,
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnCallRecord {
    pub id: String,
    pub team: String,
    pub role: String,
    pub name: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub time_window: String,
}

impl OnCallRecord {
    /// Identity used to match rows during bulk upsert.
    pub fn identity(&self) -> (String, String, String) {
        oncall_identity(&self.team, &self.role, &self.name)
    }
}

pub fn oncall_identity(team: &str, role: &str, name: &str) -> (String, String, String) {
    (
        team.trim().to_lowercase(),
        role.trim().to_lowercase(),
        name.trim().to_lowercase(),
    )
}

/// Group as the UI sees it, whichever format it was loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Option<String>,
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub business_area: String,
    #[serde(default)]
    pub lob: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub os: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub contacts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInput {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInput {
    pub name: String,
    pub business_area: Option<String>,
    pub lob: Option<String>,
    pub comment: Option<String>,
    pub owner: Option<String>,
    pub contact: Option<String>,
    pub os: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnCallInput {
    pub team: String,
    pub role: String,
    pub name: String,
    pub contact: Option<String>,
    pub time_window: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub dataset: DatasetKind,
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredError {
    pub code: String,
    pub dataset: Option<DatasetKind>,
    pub message: String,
    pub path: Option<String>,
    pub row: Option<usize>,
}

impl StructuredError {
    pub fn new(code: &str, dataset: Option<DatasetKind>, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            dataset,
            message: message.into(),
            path: None,
            row: None,
        }
    }

    pub fn warning(dataset: DatasetKind, row: usize, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            ..Self::new("VALIDATION_WARNING", Some(dataset), message)
        }
    }

    pub fn with_path(mut self, path: &std::path::Path) -> Self {
        self.path = Some(path.to_string_lossy().to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSnapshot {
    pub contacts: Vec<Contact>,
    pub servers: Vec<Server>,
    pub groups: Vec<Group>,
    pub on_call: Vec<OnCallRecord>,
    pub last_updated: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub backup_on_start: bool,
    pub backup_interval_minutes: u64,
    pub backup_after_mutation: bool,
    pub migrate_on_start: bool,
    pub watch: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backup_on_start: true,
            backup_interval_minutes: 60,
            backup_after_mutation: true,
            migrate_on_start: true,
            watch: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub migrated: Vec<DatasetKind>,
    pub skipped: Vec<DatasetKind>,
    pub failed: Vec<(DatasetKind, String)>,
}
