use super::{apply_field, read_import_source, require, supplied, MutationContext};
use crate::errors::AppResult;
use crate::headers::{HeaderMatcher, SERVER_FIELDS};
use crate::models::{DatasetKind, Grid, ImportOutcome, ServerInput, ServerRecord};
use crate::parsers::is_blank_row;
use crate::parsers::servers::normalize_server_text;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const OPTIONAL_FIELDS: [&str; 6] = ["business_area", "lob", "comment", "owner", "contact", "os"];

fn cleaned(input: &ServerInput) -> ServerInput {
    let trim = |value: &Option<String>| value.as_deref().map(|value| value.trim().to_string());
    ServerInput {
        name: input.name.trim().to_string(),
        business_area: trim(&input.business_area),
        lob: trim(&input.lob),
        comment: trim(&input.comment),
        owner: trim(&input.owner),
        contact: trim(&input.contact),
        os: trim(&input.os),
    }
}

fn optional<'a>(input: &'a ServerInput, key: &str) -> Option<&'a str> {
    match key {
        "business_area" => input.business_area.as_deref(),
        "lob" => input.lob.as_deref(),
        "comment" => input.comment.as_deref(),
        "owner" => input.owner.as_deref(),
        "contact" => input.contact.as_deref(),
        "os" => input.os.as_deref(),
        _ => None,
    }
}

/// Updates the supplied fields of a row. The stored name keeps its spelling.
fn fill_row(matcher: &HeaderMatcher, row: &mut Vec<String>, input: &ServerInput) {
    for key in OPTIONAL_FIELDS {
        apply_field(matcher, row, key, optional(input, key));
    }
}

fn fill_record(record: &mut ServerRecord, input: &ServerInput) {
    let targets = [
        &mut record.business_area,
        &mut record.lob,
        &mut record.comment,
        &mut record.owner,
        &mut record.contact,
        &mut record.os,
    ];
    for (key, target) in OPTIONAL_FIELDS.into_iter().zip(targets) {
        if let Some(value) = optional(input, key) {
            *target = value.to_string();
        }
    }
    record.updated_at = Utc::now();
}

fn new_record(input: &ServerInput) -> ServerRecord {
    let now = Utc::now();
    let mut record = ServerRecord {
        id: Uuid::new_v4().to_string(),
        name: input.name.clone(),
        business_area: String::new(),
        lob: String::new(),
        comment: String::new(),
        owner: String::new(),
        contact: String::new(),
        os: String::new(),
        created_at: now,
        updated_at: now,
    };
    fill_record(&mut record, input);
    record.updated_at = now;
    record
}

fn merge_into_grid(ctx: &MutationContext, grid: &mut Grid, inputs: &[ServerInput]) -> ImportOutcome {
    let matcher = HeaderMatcher::ensure(grid, SERVER_FIELDS);
    let width = grid[0].len();
    let mut index = grid
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(row_index, row)| {
            let name = matcher.cell(row, "name");
            (!name.is_empty()).then(|| (name.to_lowercase(), row_index))
        })
        .collect::<HashMap<_, _>>();

    let mut outcome = ImportOutcome::default();
    let total = inputs.len();
    for (position, input) in inputs.iter().enumerate() {
        if input.name.is_empty() {
            outcome.skipped += 1;
        } else if let Some(&row_index) = index.get(&input.name.to_lowercase()) {
            fill_row(&matcher, &mut grid[row_index], input);
            outcome.updated += 1;
        } else {
            let mut row = vec![String::new(); width];
            matcher.set(&mut row, "name", &input.name);
            fill_row(&matcher, &mut row, input);
            grid.push(row);
            index.insert(input.name.to_lowercase(), grid.len() - 1);
            outcome.added += 1;
        }
        ctx.report_progress(DatasetKind::Servers, position + 1, total);
    }
    outcome
}

fn merge_into_records(
    ctx: &MutationContext,
    records: &mut Vec<ServerRecord>,
    inputs: &[ServerInput],
) -> ImportOutcome {
    let mut index = records
        .iter()
        .enumerate()
        .map(|(position, record)| (record.name.trim().to_lowercase(), position))
        .collect::<HashMap<_, _>>();

    let mut outcome = ImportOutcome::default();
    let total = inputs.len();
    for (position, input) in inputs.iter().enumerate() {
        if input.name.is_empty() {
            outcome.skipped += 1;
        } else if let Some(&existing) = index.get(&input.name.to_lowercase()) {
            fill_record(&mut records[existing], input);
            outcome.updated += 1;
        } else {
            records.push(new_record(input));
            index.insert(input.name.to_lowercase(), records.len() - 1);
            outcome.added += 1;
        }
        ctx.report_progress(DatasetKind::Servers, position + 1, total);
    }
    outcome
}

/// Creates the server or updates the supplied fields of the one with the same name.
pub async fn add_server(ctx: &MutationContext, input: ServerInput) -> AppResult<bool> {
    require(&input.name, "server name")?;
    let outcome = import_servers(ctx, vec![input]).await?;
    Ok(outcome.added + outcome.updated > 0)
}

/// Removes every server with this name. `false`, and no write, when none matched.
pub async fn remove_server(ctx: &MutationContext, name: &str) -> AppResult<bool> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Ok(false);
    }
    let json_name = name.clone();
    ctx.edit_dataset(
        DatasetKind::Servers,
        |grid| {
            let Some(header) = grid.first() else {
                return Ok((false, false));
            };
            let matcher = HeaderMatcher::resolve(header, SERVER_FIELDS);
            if !matcher.has("name") {
                return Ok((false, false));
            }
            let before = grid.len();
            let mut rows = std::mem::take(grid).into_iter();
            grid.extend(rows.next());
            grid.extend(rows.filter(|row| !matcher.cell(row, "name").eq_ignore_ascii_case(&name)));
            let removed = grid.len() != before;
            Ok((removed, removed))
        },
        move |mut records: Vec<ServerRecord>| {
            let before = records.len();
            records.retain(|record| !record.name.trim().eq_ignore_ascii_case(&json_name));
            if records.len() == before {
                return Ok((None, false));
            }
            Ok((Some(records), true))
        },
    )
    .await
}

fn merge_json(
    ctx: &MutationContext,
    inputs: Vec<ServerInput>,
) -> impl FnOnce(Vec<ServerRecord>) -> AppResult<(Option<Vec<ServerRecord>>, ImportOutcome)> + Send + 'static {
    let worker = ctx.clone();
    move |mut records| {
        let outcome = merge_into_records(&worker, &mut records, &inputs);
        let changed = outcome.added + outcome.updated > 0;
        Ok((changed.then_some(records), outcome))
    }
}

pub async fn import_servers(ctx: &MutationContext, inputs: Vec<ServerInput>) -> AppResult<ImportOutcome> {
    let inputs = inputs.iter().map(cleaned).collect::<Vec<_>>();
    ctx.edit_dataset(
        DatasetKind::Servers,
        |grid| {
            let outcome = merge_into_grid(ctx, grid, &inputs);
            Ok((outcome.added + outcome.updated > 0, outcome))
        },
        merge_json(ctx, inputs.clone()),
    )
    .await
}

fn inputs_from_grid(grid: &Grid) -> Vec<ServerInput> {
    let Some(header) = grid.first() else {
        return Vec::new();
    };
    let matcher = HeaderMatcher::resolve(header, SERVER_FIELDS);
    grid.iter()
        .skip(1)
        .filter(|row| !is_blank_row(row))
        .map(|row| ServerInput {
            name: matcher.cell(row, "name").to_string(),
            business_area: supplied(matcher.cell(row, "business_area")),
            lob: supplied(matcher.cell(row, "lob")),
            comment: supplied(matcher.cell(row, "comment")),
            owner: supplied(matcher.cell(row, "owner")),
            contact: supplied(matcher.cell(row, "contact")),
            os: supplied(matcher.cell(row, "os")),
        })
        .collect()
}

/// Imports an exported server list. Preamble lines and legacy headers are normalized
/// first; a CSV target with no rows yet takes the source's header row as-is.
pub async fn import_servers_file(ctx: &MutationContext, source: &Path) -> AppResult<ImportOutcome> {
    let text = read_import_source(source).await?;
    let (source_grid, _) = normalize_server_text(&text)?;
    let inputs = inputs_from_grid(&source_grid);

    let cleaned_inputs = inputs.iter().map(cleaned).collect::<Vec<_>>();
    let outcome = ctx
        .edit_dataset(
            DatasetKind::Servers,
            |grid| {
                if grid.iter().all(|row| is_blank_row(row)) && !source_grid.is_empty() {
                    *grid = source_grid.clone();
                    let rows = grid.len() - 1;
                    let named = inputs.iter().filter(|input| !input.name.is_empty()).count();
                    ctx.report_progress(DatasetKind::Servers, rows, rows);
                    let outcome = ImportOutcome {
                        added: named,
                        updated: 0,
                        skipped: inputs.len() - named,
                    };
                    return Ok((true, outcome));
                }
                let outcome = merge_into_grid(ctx, grid, &cleaned_inputs);
                Ok((outcome.added + outcome.updated > 0, outcome))
            },
            merge_json(ctx, cleaned_inputs.clone()),
        )
        .await?;
    tracing::info!(
        source = %source.to_string_lossy(),
        added = outcome.added,
        updated = outcome.updated,
        skipped = outcome.skipped,
        "servers imported"
    );
    Ok(outcome)
}
