use super::{is_blank_row, ParseOutcome};
use crate::headers::{HeaderMatcher, ONCALL_FIELDS};
use crate::models::{DatasetKind, Grid, OnCallRecord, StructuredError};

/// Parses the legacy roster sheet. A blank team cell continues the team above it, which is
/// how hand-maintained rosters group their rows.
pub fn parse_oncall_grid(grid: &Grid) -> ParseOutcome<OnCallRecord> {
    let mut outcome = ParseOutcome::empty();
    let Some(header) = grid.first() else {
        return outcome;
    };
    let matcher = HeaderMatcher::resolve(header, ONCALL_FIELDS);
    if !matcher.has("team") || !matcher.has("name") {
        outcome.warnings.push(StructuredError::warning(
            DatasetKind::OnCall,
            0,
            "on-call header needs team and name columns",
        ));
    }

    let mut current_team = String::new();
    for (row_index, row) in grid.iter().enumerate().skip(1) {
        if is_blank_row(row) {
            continue;
        }
        let team = matcher.cell(row, "team");
        if !team.is_empty() {
            current_team = team.to_string();
        }
        let name = matcher.cell(row, "name");
        if current_team.is_empty() || name.is_empty() {
            outcome.warnings.push(StructuredError::warning(
                DatasetKind::OnCall,
                row_index,
                "on-call row is missing a team or a name",
            ));
        }
        outcome.records.push(OnCallRecord {
            id: format!("legacy-{}", row_index),
            team: current_team.clone(),
            role: matcher.cell(row, "role").to_string(),
            name: name.to_string(),
            contact: matcher.cell(row, "contact").to_string(),
            time_window: matcher.cell(row, "time_window").to_string(),
        });
    }
    outcome
}
