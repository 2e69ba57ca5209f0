use super::{is_blank_row, raw_row, search_string, ParseOutcome};
use crate::codec::{parse_grid, sanitize_content};
use crate::errors::AppResult;
use crate::headers::{canonicalize_header, HeaderMatcher, SERVER_FIELDS, SERVER_HEADER_OVERRIDES};
use crate::models::{DatasetKind, Grid, Server, ServerRecord, StructuredError};
use std::collections::HashSet;

/// How many leading lines may precede the header in exported server lists.
pub const PREAMBLE_SCAN_LINES: usize = 10;

fn looks_like_header(line: &str) -> bool {
    let keywords = SERVER_FIELDS[0].aliases;
    line.split(',')
        .map(|cell| cell.trim().trim_matches('"').trim().to_lowercase())
        .any(|cell| keywords.contains(&cell.as_str()))
}

/// Number of lines to drop before the header row. Zero when no header keyword shows up
/// within the scan window.
pub fn header_offset(content: &str) -> usize {
    content
        .lines()
        .take(PREAMBLE_SCAN_LINES)
        .position(looks_like_header)
        .unwrap_or(0)
}

/// Sanitizes, strips any preamble, parses, and renames legacy headers. The flag reports
/// whether the result differs structurally from the source file.
pub fn normalize_server_text(text: &str) -> AppResult<(Grid, bool)> {
    let content = sanitize_content(text);
    let offset = header_offset(&content);
    let body = content.lines().skip(offset).collect::<Vec<_>>().join("\n");
    let mut grid = parse_grid(&body)?;
    let renamed = match grid.first_mut() {
        Some(header) => canonicalize_header(header, SERVER_FIELDS, SERVER_HEADER_OVERRIDES),
        None => false,
    };
    Ok((grid, offset > 0 || renamed))
}

pub fn parse_servers(text: &str) -> AppResult<ParseOutcome<Server>> {
    let (grid, dirty) = normalize_server_text(text)?;
    if grid.is_empty() {
        return Ok(ParseOutcome::empty());
    }

    let mut outcome = ParseOutcome::empty();
    let header = &grid[0];
    let matcher = HeaderMatcher::resolve(header, SERVER_FIELDS);
    if !matcher.has("name") {
        outcome.warnings.push(StructuredError::warning(
            DatasetKind::Servers,
            0,
            "servers header has no name column",
        ));
    }

    let mut seen = HashSet::new();
    for (row_index, row) in grid.iter().enumerate().skip(1) {
        if is_blank_row(row) {
            continue;
        }
        let server = Server {
            name: matcher.cell(row, "name").to_string(),
            business_area: matcher.cell(row, "business_area").to_string(),
            lob: matcher.cell(row, "lob").to_string(),
            comment: matcher.cell(row, "comment").to_string(),
            owner: matcher.cell(row, "owner").to_string(),
            contact: matcher.cell(row, "contact").to_string(),
            os: matcher.cell(row, "os").to_string(),
            search_string: String::new(),
            raw: raw_row(header, row),
        };

        if server.name.is_empty() {
            outcome.warnings.push(StructuredError::warning(
                DatasetKind::Servers,
                row_index,
                "server row has no name",
            ));
        } else if !seen.insert(server.name.to_lowercase()) {
            outcome.warnings.push(StructuredError::warning(
                DatasetKind::Servers,
                row_index,
                format!("duplicate server name '{}'", server.name),
            ));
        }

        outcome.records.push(with_search_string(server));
    }

    if dirty {
        outcome.repaired = Some(grid);
    }
    Ok(outcome)
}

fn with_search_string(mut server: Server) -> Server {
    server.search_string = search_string(&[
        &server.name,
        &server.business_area,
        &server.lob,
        &server.comment,
        &server.owner,
        &server.contact,
        &server.os,
    ]);
    server
}

pub fn from_records(records: &[ServerRecord]) -> Vec<Server> {
    records
        .iter()
        .map(|record| {
            with_search_string(Server {
                name: record.name.clone(),
                business_area: record.business_area.clone(),
                lob: record.lob.clone(),
                comment: record.comment.clone(),
                owner: record.owner.clone(),
                contact: record.contact.clone(),
                os: record.os.clone(),
                search_string: String::new(),
                raw: Default::default(),
            })
        })
        .collect()
}
