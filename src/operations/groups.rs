//! Group mutations. The CSV form is column-wise: each header cell is a group, the cells
//! beneath it its members. Removing a member blanks its cell; adding one fills the
//! first blank cell in the column before a new row is appended.

use super::{require, MutationContext};
use crate::errors::AppResult;
use crate::models::{DatasetKind, Grid, GroupRecord};
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

fn group_column(grid: &Grid, name: &str) -> Option<usize> {
    grid.first()?
        .iter()
        .position(|cell| cell.trim().eq_ignore_ascii_case(name))
}

fn cell(grid: &Grid, row: usize, column: usize) -> &str {
    grid.get(row)
        .and_then(|cells| cells.get(column))
        .map(|value| value.trim())
        .unwrap_or("")
}

fn set_cell(grid: &mut Grid, row: usize, column: usize, value: &str) {
    while grid.len() <= row {
        grid.push(Vec::new());
    }
    let cells = &mut grid[row];
    if cells.len() <= column {
        cells.resize(column + 1, String::new());
    }
    cells[column] = value.to_string();
}

fn column_has_member(grid: &Grid, column: usize, email: &str) -> bool {
    (1..grid.len()).any(|row| cell(grid, row, column).eq_ignore_ascii_case(email))
}

/// Fills the first vacated cell of the column, growing the grid only when there is none.
fn place_member(grid: &mut Grid, column: usize, email: &str) {
    let row = (1..grid.len())
        .find(|row| cell(grid, *row, column).is_empty())
        .unwrap_or(grid.len());
    set_cell(grid, row, column, email);
}

fn dedup_members(members: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    members
        .iter()
        .map(|member| member.trim())
        .filter(|member| !member.is_empty() && seen.insert(member.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn find_record<'a>(records: &'a mut [GroupRecord], name: &str) -> Option<&'a mut GroupRecord> {
    records
        .iter_mut()
        .find(|record| record.name.trim().eq_ignore_ascii_case(name))
}

fn new_record(name: &str) -> GroupRecord {
    let now = Utc::now();
    GroupRecord {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        contacts: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Runs `edit` against whichever format groups are stored in. Both closures return
/// `Some(result)` when they changed the data and `None` to skip the write.
async fn edit_groups<R, C, J>(ctx: &MutationContext, edit_csv: C, edit_json: J) -> AppResult<Option<R>>
where
    R: Send + 'static,
    C: FnOnce(&mut Grid) -> Option<R>,
    J: FnOnce(&mut Vec<GroupRecord>) -> Option<R> + Send + 'static,
{
    ctx.edit_dataset(
        DatasetKind::Groups,
        |grid| {
            let result = edit_csv(grid);
            Ok((result.is_some(), result))
        },
        move |mut records: Vec<GroupRecord>| {
            let result = edit_json(&mut records);
            Ok((result.is_some().then_some(records), result))
        },
    )
    .await
}

/// `false` when a group with this name already exists.
pub async fn add_group(ctx: &MutationContext, name: &str) -> AppResult<bool> {
    let name = require(name, "group name")?;
    let json_name = name.clone();
    let added = edit_groups(
        ctx,
        |grid| {
            if group_column(grid, &name).is_some() {
                return None;
            }
            if grid.is_empty() {
                grid.push(Vec::new());
            }
            grid[0].push(name.clone());
            Some(())
        },
        move |records| {
            if find_record(records, &json_name).is_some() {
                return None;
            }
            records.push(new_record(&json_name));
            Some(())
        },
    )
    .await?;
    Ok(added.is_some())
}

pub async fn remove_group(ctx: &MutationContext, name: &str) -> AppResult<bool> {
    let name = name.trim().to_string();
    let json_name = name.clone();
    let removed = edit_groups(
        ctx,
        |grid| {
            let column = group_column(grid, &name)?;
            for row in grid.iter_mut() {
                if column < row.len() {
                    row.remove(column);
                }
            }
            Some(())
        },
        move |records| {
            let before = records.len();
            records.retain(|record| !record.name.trim().eq_ignore_ascii_case(&json_name));
            (records.len() != before).then_some(())
        },
    )
    .await?;
    Ok(removed.is_some())
}

/// `false` when `from` does not exist or `to` is already taken by another group.
pub async fn rename_group(ctx: &MutationContext, from: &str, to: &str) -> AppResult<bool> {
    let from = from.trim().to_string();
    let to = require(to, "group name")?;
    let (json_from, json_to) = (from.clone(), to.clone());
    let renamed = edit_groups(
        ctx,
        |grid| {
            let column = group_column(grid, &from)?;
            if group_column(grid, &to).is_some_and(|other| other != column) {
                return None;
            }
            grid[0][column] = to.clone();
            Some(())
        },
        move |records| {
            let clash = records.iter().any(|record| {
                record.name.trim().eq_ignore_ascii_case(&json_to)
                    && !record.name.trim().eq_ignore_ascii_case(&json_from)
            });
            if clash {
                return None;
            }
            let record = find_record(records, &json_from)?;
            record.name = json_to;
            record.updated_at = Utc::now();
            Some(())
        },
    )
    .await?;
    Ok(renamed.is_some())
}

/// `false` when the group is unknown or already lists this member.
pub async fn add_group_member(ctx: &MutationContext, group: &str, email: &str) -> AppResult<bool> {
    let group = group.trim().to_string();
    let email = require(email, "member email")?;
    let (json_group, json_email) = (group.clone(), email.clone());
    let added = edit_groups(
        ctx,
        |grid| {
            let column = group_column(grid, &group)?;
            if column_has_member(grid, column, &email) {
                return None;
            }
            place_member(grid, column, &email);
            Some(())
        },
        move |records| {
            let record = find_record(records, &json_group)?;
            if record
                .contacts
                .iter()
                .any(|member| member.trim().eq_ignore_ascii_case(&json_email))
            {
                return None;
            }
            record.contacts.push(json_email);
            record.updated_at = Utc::now();
            Some(())
        },
    )
    .await?;
    Ok(added.is_some())
}

/// Blanks the member's cell, leaving a hole for the next addition.
pub async fn remove_group_member(ctx: &MutationContext, group: &str, email: &str) -> AppResult<bool> {
    let group = group.trim().to_string();
    let email = email.trim().to_string();
    let (json_group, json_email) = (group.clone(), email.clone());
    let removed = edit_groups(
        ctx,
        |grid| {
            let column = group_column(grid, &group)?;
            let row = (1..grid.len()).find(|row| cell(grid, *row, column).eq_ignore_ascii_case(&email))?;
            set_cell(grid, row, column, "");
            Some(())
        },
        move |records| {
            let record = find_record(records, &json_group)?;
            let before = record.contacts.len();
            record
                .contacts
                .retain(|member| !member.trim().eq_ignore_ascii_case(&json_email));
            if record.contacts.len() == before {
                return None;
            }
            record.updated_at = Utc::now();
            Some(())
        },
    )
    .await?;
    Ok(removed.is_some())
}

/// Replaces a group's membership wholesale; duplicates and blanks are dropped.
pub async fn set_group_members(ctx: &MutationContext, group: &str, members: Vec<String>) -> AppResult<bool> {
    let group = group.trim().to_string();
    let members = dedup_members(&members);
    let (json_group, json_members) = (group.clone(), members.clone());
    let replaced = edit_groups(
        ctx,
        |grid| {
            let column = group_column(grid, &group)?;
            for row in 1..grid.len() {
                if column < grid[row].len() {
                    grid[row][column].clear();
                }
            }
            for (offset, member) in members.iter().enumerate() {
                set_cell(grid, offset + 1, column, member);
            }
            Some(())
        },
        move |records| {
            let record = find_record(records, &json_group)?;
            record.contacts = json_members;
            record.updated_at = Utc::now();
            Some(())
        },
    )
    .await?;
    Ok(replaced.is_some())
}
