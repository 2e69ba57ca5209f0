use crate::models::Grid;
use std::collections::HashMap;

/// One logical column: lookup key, the header written when the column is created, and
/// the accepted spellings in priority order.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
}

pub const CONTACT_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "name",
        canonical: "Name",
        aliases: &["full name", "name", "display name", "contact name"],
    },
    FieldSpec {
        key: "email",
        canonical: "Email",
        aliases: &["email", "e-mail", "email address", "mail"],
    },
    FieldSpec {
        key: "phone",
        canonical: "Phone",
        aliases: &["phone", "phone number", "mobile", "cell", "telephone"],
    },
    FieldSpec {
        key: "title",
        canonical: "Title",
        aliases: &["title", "job title", "position"],
    },
];

pub const SERVER_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "name",
        canonical: "Name",
        aliases: &["name", "vm-m", "server name", "server", "hostname"],
    },
    FieldSpec {
        key: "business_area",
        canonical: "Business Area",
        aliases: &["business area", "businessarea", "area"],
    },
    FieldSpec {
        key: "lob",
        canonical: "LOB",
        aliases: &["lob", "line of business"],
    },
    FieldSpec {
        key: "comment",
        canonical: "Comment",
        aliases: &["comment", "comments", "notes"],
    },
    FieldSpec {
        key: "owner",
        canonical: "Owner",
        aliases: &["owner", "warden", "server warden", "lob owner"],
    },
    FieldSpec {
        key: "contact",
        canonical: "IT Contact",
        aliases: &["it contact", "it tech support contact", "technical contact", "contact"],
    },
    FieldSpec {
        key: "os",
        canonical: "OS",
        aliases: &["os", "operating system", "server os", "os type"],
    },
];

pub const ONCALL_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "team",
        canonical: "Team",
        aliases: &["team", "group"],
    },
    FieldSpec {
        key: "role",
        canonical: "Role",
        aliases: &["role", "position"],
    },
    FieldSpec {
        key: "name",
        canonical: "Name",
        aliases: &["name", "person"],
    },
    FieldSpec {
        key: "contact",
        canonical: "Contact",
        aliases: &["contact", "phone", "email"],
    },
    FieldSpec {
        key: "time_window",
        canonical: "Time Window",
        aliases: &["time window", "window", "shift", "time"],
    },
];

/// Server exports call the owner column "Server Warden"; it is kept as "Warden" rather
/// than folded into "Owner".
pub const SERVER_HEADER_OVERRIDES: &[(&str, &str)] = &[("server warden", "Warden"), ("warden", "Warden")];

pub fn canonical_header(fields: &[FieldSpec]) -> Vec<String> {
    fields.iter().map(|field| field.canonical.to_string()).collect()
}

fn normalize(cell: &str) -> String {
    cell.trim().to_lowercase()
}

/// First column matching any alias, trying aliases in list order.
pub fn find_column(header: &[String], aliases: &[&str]) -> Option<usize> {
    let normalized = header.iter().map(|cell| normalize(cell)).collect::<Vec<_>>();
    aliases
        .iter()
        .find_map(|alias| normalized.iter().position(|cell| cell == alias))
}

/// Resolves a column like [`find_column`] and creates it on a miss: the canonical
/// header is appended and every data row is padded to the new width.
pub fn ensure_column(grid: &mut Grid, aliases: &[&str], canonical: &str) -> usize {
    if grid.is_empty() {
        grid.push(Vec::new());
    }
    let canonical_lower = canonical.to_lowercase();
    if let Some(index) = find_column(&grid[0], aliases)
        .or_else(|| find_column(&grid[0], &[canonical_lower.as_str()]))
    {
        return index;
    }

    grid[0].push(canonical.to_string());
    let width = grid[0].len();
    for row in grid.iter_mut().skip(1) {
        if row.len() < width {
            row.resize(width, String::new());
        }
    }
    width - 1
}

/// Renames every column a field resolves to through a non-canonical alias. `overrides`
/// maps an alias to the spelling it should get instead of the field's canonical one. A
/// rename is skipped when the target spelling is already taken by another column.
/// Returns true when anything changed.
pub fn canonicalize_header(header: &mut [String], fields: &[FieldSpec], overrides: &[(&str, &str)]) -> bool {
    let mut changed = false;
    for field in fields {
        let Some(index) = find_column(header, field.aliases) else {
            continue;
        };
        let current = normalize(&header[index]);
        let target = overrides
            .iter()
            .find(|(alias, _)| *alias == current)
            .map(|(_, target)| *target)
            .unwrap_or(field.canonical);
        let target_lower = target.to_lowercase();
        if current == target_lower || header.iter().any(|cell| normalize(cell) == target_lower) {
            continue;
        }
        header[index] = target.to_string();
        changed = true;
    }
    changed
}

/// Column indices for a set of logical fields, resolved once per parse or mutation.
#[derive(Debug, Clone, Default)]
pub struct HeaderMatcher {
    indices: HashMap<&'static str, usize>,
}

impl HeaderMatcher {
    pub fn resolve(header: &[String], fields: &[FieldSpec]) -> Self {
        let indices = fields
            .iter()
            .filter_map(|field| find_column(header, field.aliases).map(|index| (field.key, index)))
            .collect();
        Self { indices }
    }

    /// Resolves every field, creating missing columns in the grid.
    pub fn ensure(grid: &mut Grid, fields: &[FieldSpec]) -> Self {
        let indices = fields
            .iter()
            .map(|field| (field.key, ensure_column(grid, field.aliases, field.canonical)))
            .collect();
        Self { indices }
    }

    pub fn index(&self, key: &str) -> Option<usize> {
        self.indices.get(key).copied()
    }

    pub fn has(&self, key: &str) -> bool {
        self.indices.contains_key(key)
    }

    /// Trimmed cell value for a field, empty when the column or cell is missing.
    pub fn cell<'a>(&self, row: &'a [String], key: &str) -> &'a str {
        self.index(key)
            .and_then(|index| row.get(index))
            .map(|value| value.trim())
            .unwrap_or("")
    }

    /// Writes a field, growing the row if it is short.
    pub fn set(&self, row: &mut Vec<String>, key: &str, value: &str) {
        if let Some(index) = self.index(key) {
            if row.len() <= index {
                row.resize(index + 1, String::new());
            }
            row[index] = value.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|cell| cell.to_string()).collect()
    }

    #[test]
    fn alias_order_beats_header_order() {
        let row = header(&["Name", "Email", "Full Name"]);
        assert_eq!(find_column(&row, CONTACT_FIELDS[0].aliases), Some(2));
        assert_eq!(find_column(&row, &["email"]), Some(1));
        assert_eq!(find_column(&row, &["missing"]), None);
    }

    #[test]
    fn matching_is_case_insensitive_and_trimmed() {
        let row = header(&["  E-MAIL ", "PHONE NUMBER"]);
        let matcher = HeaderMatcher::resolve(&row, CONTACT_FIELDS);
        assert_eq!(matcher.index("email"), Some(0));
        assert_eq!(matcher.index("phone"), Some(1));
        assert!(!matcher.has("name"));
    }

    #[test]
    fn ensure_column_is_idempotent_and_pads_rows() {
        let mut grid = vec![header(&["Name", "Email", "Phone1"]), header(&["User", "u@a.com"])];
        let first = ensure_column(&mut grid, CONTACT_FIELDS[2].aliases, "Phone");
        let second = ensure_column(&mut grid, CONTACT_FIELDS[2].aliases, "Phone");
        assert_eq!(first, 3);
        assert_eq!(second, 3);
        assert_eq!(grid[0], header(&["Name", "Email", "Phone1", "Phone"]));
        assert_eq!(grid[1].len(), 4);
    }

    #[test]
    fn ensure_column_matches_canonical_outside_alias_list() {
        let mut grid = vec![header(&["Warden"])];
        assert_eq!(ensure_column(&mut grid, &["owner"], "Warden"), 0);
        assert_eq!(grid[0].len(), 1);
    }

    #[test]
    fn legacy_server_headers_are_renamed() {
        let mut row = header(&["VM-M", "Server Warden", "LOB"]);
        assert!(canonicalize_header(&mut row, SERVER_FIELDS, SERVER_HEADER_OVERRIDES));
        assert_eq!(row, header(&["Name", "Warden", "LOB"]));
        assert!(!canonicalize_header(&mut row, SERVER_FIELDS, SERVER_HEADER_OVERRIDES));
    }

    #[test]
    fn every_alias_is_canonicalized() {
        let mut contacts = header(&["Display Name", "Mail", "Mobile", "Position", "Notes"]);
        assert!(canonicalize_header(&mut contacts, CONTACT_FIELDS, &[]));
        assert_eq!(contacts, header(&["Name", "Email", "Phone", "Title", "Notes"]));

        let mut servers = header(&["Hostname", "Operating System", "Notes", "Telephone"]);
        assert!(canonicalize_header(&mut servers, SERVER_FIELDS, SERVER_HEADER_OVERRIDES));
        assert_eq!(servers, header(&["Name", "OS", "Comment", "Telephone"]));
    }

    #[test]
    fn canonical_spellings_in_other_case_are_left_alone() {
        let mut row = header(&["name", "EMAIL"]);
        assert!(!canonicalize_header(&mut row, CONTACT_FIELDS, &[]));
        assert_eq!(row, header(&["name", "EMAIL"]));
    }

    #[test]
    fn rename_skips_when_canonical_present() {
        let mut row = header(&["Name", "Full Name"]);
        assert!(!canonicalize_header(&mut row, CONTACT_FIELDS, &[]));
        assert_eq!(row, header(&["Name", "Full Name"]));
    }

    #[test]
    fn ensure_builds_full_matcher_on_empty_grid() {
        let mut grid: Grid = Vec::new();
        let matcher = HeaderMatcher::ensure(&mut grid, SERVER_FIELDS);
        assert_eq!(grid[0], canonical_header(SERVER_FIELDS));
        assert_eq!(matcher.index("os"), Some(6));
    }
}
