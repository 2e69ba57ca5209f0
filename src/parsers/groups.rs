use super::ParseOutcome;
use crate::models::{DatasetKind, Grid, Group, GroupRecord, StructuredError};
use std::collections::HashSet;

/// Reads a column-wise group sheet: each header cell names a group, the non-empty cells
/// beneath it are member emails. Gaps left by removed members are skipped.
pub fn parse_group_grid(grid: &Grid) -> ParseOutcome<Group> {
    let mut outcome = ParseOutcome::empty();
    let Some(header) = grid.first() else {
        return outcome;
    };

    let mut seen_groups = HashSet::new();
    for (column, name) in header.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if !seen_groups.insert(name.to_lowercase()) {
            outcome.warnings.push(StructuredError::warning(
                DatasetKind::Groups,
                0,
                format!("duplicate group name '{}'", name),
            ));
        }

        let mut seen_members = HashSet::new();
        let mut members = Vec::new();
        for (row_index, row) in grid.iter().enumerate().skip(1) {
            let Some(cell) = row.get(column).map(|cell| cell.trim()) else {
                continue;
            };
            if cell.is_empty() {
                continue;
            }
            if !seen_members.insert(cell.to_lowercase()) {
                outcome.warnings.push(StructuredError::warning(
                    DatasetKind::Groups,
                    row_index,
                    format!("'{}' is listed twice in group '{}'", cell, name),
                ));
                continue;
            }
            members.push(cell.to_string());
        }

        outcome.records.push(Group {
            id: None,
            name: name.to_string(),
            members,
        });
    }
    outcome
}

pub fn from_records(records: &[GroupRecord]) -> Vec<Group> {
    records
        .iter()
        .map(|record| Group {
            id: Some(record.id.clone()),
            name: record.name.clone(),
            members: record.contacts.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_grid;

    #[test]
    fn columns_become_groups_and_holes_are_skipped() {
        let grid = parse_grid("Engineering,Marketing\na@x.com,m@x.com\n,n@x.com\nb@x.com,\n").expect("grid");
        let outcome = parse_group_grid(&grid);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].name, "Engineering");
        assert_eq!(outcome.records[0].members, vec!["a@x.com", "b@x.com"]);
        assert_eq!(outcome.records[1].members, vec!["m@x.com", "n@x.com"]);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn empty_groups_and_ragged_rows_are_fine() {
        let grid = parse_grid("Default,Developers,Ops\nd@x.com\n").expect("grid");
        let outcome = parse_group_grid(&grid);
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.records[2].members.is_empty());
    }

    #[test]
    fn duplicate_members_warn_once_each() {
        let grid = parse_grid("Team\na@x.com\nA@X.com\n").expect("grid");
        let outcome = parse_group_grid(&grid);
        assert_eq!(outcome.records[0].members, vec!["a@x.com"]);
        assert_eq!(outcome.warnings.len(), 1);
    }
}
