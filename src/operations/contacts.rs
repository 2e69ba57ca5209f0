use super::{apply_field, read_import_source, require, supplied, MutationContext};
use crate::codec::parse_grid;
use crate::errors::AppResult;
use crate::headers::{HeaderMatcher, CONTACT_FIELDS};
use crate::models::{ContactInput, ContactRecord, DatasetKind, Grid, ImportOutcome};
use crate::parsers::contacts::{normalize_phone, parse_contacts};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

fn cleaned(input: &ContactInput) -> ContactInput {
    ContactInput {
        email: input.email.trim().to_string(),
        name: input.name.as_deref().map(|name| name.trim().to_string()),
        phone: input.phone.as_deref().map(normalize_phone),
        title: input.title.as_deref().map(|title| title.trim().to_string()),
    }
}

/// Updates the supplied fields of a row. The stored email keeps its spelling.
fn fill_row(matcher: &HeaderMatcher, row: &mut Vec<String>, input: &ContactInput) {
    apply_field(matcher, row, "name", input.name.as_deref());
    apply_field(matcher, row, "phone", input.phone.as_deref());
    apply_field(matcher, row, "title", input.title.as_deref());
}

fn fill_record(record: &mut ContactRecord, input: &ContactInput) {
    if let Some(name) = &input.name {
        record.name = name.clone();
    }
    if let Some(phone) = &input.phone {
        record.phone = phone.clone();
    }
    if let Some(title) = &input.title {
        record.title = title.clone();
    }
    record.updated_at = Utc::now();
}

fn new_record(input: &ContactInput) -> ContactRecord {
    let now = Utc::now();
    ContactRecord {
        id: Uuid::new_v4().to_string(),
        name: input.name.clone().unwrap_or_default(),
        email: input.email.clone(),
        phone: input.phone.clone().unwrap_or_default(),
        title: input.title.clone().unwrap_or_default(),
        created_at: now,
        updated_at: now,
    }
}

/// Upserts `inputs` into the grid keyed by email. The email index is built once up front.
fn merge_into_grid(
    ctx: &MutationContext,
    grid: &mut Grid,
    inputs: &[ContactInput],
) -> ImportOutcome {
    let matcher = HeaderMatcher::ensure(grid, CONTACT_FIELDS);
    let width = grid[0].len();
    let mut index = grid
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(row_index, row)| {
            let email = matcher.cell(row, "email");
            (!email.is_empty()).then(|| (email.to_lowercase(), row_index))
        })
        .collect::<HashMap<_, _>>();

    let mut outcome = ImportOutcome::default();
    let total = inputs.len();
    for (position, input) in inputs.iter().enumerate() {
        if input.email.is_empty() {
            outcome.skipped += 1;
        } else if let Some(&row_index) = index.get(&input.email.to_lowercase()) {
            fill_row(&matcher, &mut grid[row_index], input);
            outcome.updated += 1;
        } else {
            let mut row = vec![String::new(); width];
            matcher.set(&mut row, "email", &input.email);
            fill_row(&matcher, &mut row, input);
            grid.push(row);
            index.insert(input.email.to_lowercase(), grid.len() - 1);
            outcome.added += 1;
        }
        ctx.report_progress(DatasetKind::Contacts, position + 1, total);
    }
    outcome
}

fn merge_into_records(
    ctx: &MutationContext,
    records: &mut Vec<ContactRecord>,
    inputs: &[ContactInput],
) -> ImportOutcome {
    let mut index = records
        .iter()
        .enumerate()
        .map(|(position, record)| (record.email.trim().to_lowercase(), position))
        .collect::<HashMap<_, _>>();

    let mut outcome = ImportOutcome::default();
    let total = inputs.len();
    for (position, input) in inputs.iter().enumerate() {
        if input.email.is_empty() {
            outcome.skipped += 1;
        } else if let Some(&existing) = index.get(&input.email.to_lowercase()) {
            fill_record(&mut records[existing], input);
            outcome.updated += 1;
        } else {
            records.push(new_record(input));
            index.insert(input.email.to_lowercase(), records.len() - 1);
            outcome.added += 1;
        }
        ctx.report_progress(DatasetKind::Contacts, position + 1, total);
    }
    outcome
}

/// Creates the contact or updates the supplied fields of the one with the same email.
pub async fn add_contact(ctx: &MutationContext, input: ContactInput) -> AppResult<bool> {
    require(&input.email, "contact email")?;
    let input = cleaned(&input);
    let json_input = input.clone();
    ctx.edit_dataset(
        DatasetKind::Contacts,
        |grid| {
            let matcher = HeaderMatcher::ensure(grid, CONTACT_FIELDS);
            let existing = grid
                .iter()
                .skip(1)
                .position(|row| matcher.cell(row, "email").eq_ignore_ascii_case(&input.email));
            match existing {
                Some(offset) => fill_row(&matcher, &mut grid[offset + 1], &input),
                None => {
                    let mut row = vec![String::new(); grid[0].len()];
                    matcher.set(&mut row, "email", &input.email);
                    fill_row(&matcher, &mut row, &input);
                    grid.push(row);
                }
            }
            Ok((true, true))
        },
        move |mut records: Vec<ContactRecord>| {
            match records
                .iter_mut()
                .find(|record| record.email.trim().eq_ignore_ascii_case(&json_input.email))
            {
                Some(record) => fill_record(record, &json_input),
                None => records.push(new_record(&json_input)),
            }
            Ok((Some(records), true))
        },
    )
    .await
}

/// Removes every contact with this email. `false`, and no write, when none matched.
pub async fn remove_contact(ctx: &MutationContext, email: &str) -> AppResult<bool> {
    let email = email.trim().to_string();
    if email.is_empty() {
        return Ok(false);
    }
    let json_email = email.clone();
    ctx.edit_dataset(
        DatasetKind::Contacts,
        |grid| {
            let Some(header) = grid.first() else {
                return Ok((false, false));
            };
            let matcher = HeaderMatcher::resolve(header, CONTACT_FIELDS);
            if !matcher.has("email") {
                return Ok((false, false));
            }
            let before = grid.len();
            let mut rows = std::mem::take(grid).into_iter();
            grid.extend(rows.next());
            grid.extend(rows.filter(|row| !matcher.cell(row, "email").eq_ignore_ascii_case(&email)));
            let removed = grid.len() != before;
            Ok((removed, removed))
        },
        move |mut records: Vec<ContactRecord>| {
            let before = records.len();
            records.retain(|record| !record.email.trim().eq_ignore_ascii_case(&json_email));
            if records.len() == before {
                return Ok((None, false));
            }
            Ok((Some(records), true))
        },
    )
    .await
}

/// Merges many contacts in one write. Rows without an email are skipped.
pub async fn import_contacts(ctx: &MutationContext, inputs: Vec<ContactInput>) -> AppResult<ImportOutcome> {
    let inputs = inputs.iter().map(cleaned).collect::<Vec<_>>();
    let json_inputs = inputs.clone();
    let worker = ctx.clone();
    let outcome = ctx
        .edit_dataset(
            DatasetKind::Contacts,
            |grid| {
                let outcome = merge_into_grid(ctx, grid, &inputs);
                Ok((outcome.added + outcome.updated > 0, outcome))
            },
            move |mut records: Vec<ContactRecord>| {
                let outcome = merge_into_records(&worker, &mut records, &json_inputs);
                let changed = outcome.added + outcome.updated > 0;
                Ok((changed.then_some(records), outcome))
            },
        )
        .await?;
    tracing::info!(
        added = outcome.added,
        updated = outcome.updated,
        skipped = outcome.skipped,
        "contacts imported"
    );
    Ok(outcome)
}

/// Imports a CSV picked by the user. Its headers go through the same alias table and
/// legacy renames as the dataset file; empty cells never overwrite existing values.
pub async fn import_contacts_file(ctx: &MutationContext, source: &Path) -> AppResult<ImportOutcome> {
    let text = read_import_source(source).await?;
    let parsed = parse_contacts(parse_grid(&text)?);
    for warning in parsed.warnings {
        ctx.sink.emit_error(warning.with_path(source));
    }
    let inputs = parsed
        .records
        .into_iter()
        .map(|contact| ContactInput {
            email: contact.email,
            name: supplied(&contact.name),
            phone: supplied(&contact.phone),
            title: supplied(&contact.title),
        })
        .collect();
    import_contacts(ctx, inputs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::context;

    fn input(email: &str, name: &str) -> ContactInput {
        ContactInput {
            email: email.to_string(),
            name: Some(name.to_string()),
            ..ContactInput::default()
        }
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).expect("read dataset")
    }

    #[tokio::test]
    async fn add_creates_canonical_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path());
        assert!(add_contact(&ctx, input("ada@x.com", "Ada")).await.expect("add"));
        let text = read(&dir.path().join("contacts.csv"));
        assert_eq!(text, "\u{feff}Name,Email,Phone,Title\nAda,ada@x.com,,\n");
    }

    #[tokio::test]
    async fn add_updates_only_supplied_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("contacts.csv"),
            "Name,Email,Phone,Title\nAda,ADA@x.com,+1555,Engineer\n",
        )
        .expect("seed");
        let ctx = context(dir.path());
        let update = ContactInput {
            email: "ada@x.com".to_string(),
            title: Some("Director".to_string()),
            ..ContactInput::default()
        };
        assert!(add_contact(&ctx, update).await.expect("upsert"));
        let text = read(&dir.path().join("contacts.csv"));
        // Leading `+` is stored escaped and reads back unescaped.
        assert!(text.ends_with("Ada,ADA@x.com,'+1555,Director\n"), "{text}");
    }

    #[tokio::test]
    async fn add_rejects_missing_email() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context(dir.path());
        let error = add_contact(&ctx, input(" ", "Nobody")).await.expect_err("invalid");
        assert_eq!(error.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn remove_missing_contact_does_not_touch_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contacts.csv");
        std::fs::write(&path, "Name,Email\nAda,ada@x.com\n").expect("seed");
        let before = std::fs::metadata(&path).expect("meta").modified().expect("mtime");
        let ctx = context(dir.path());

        assert!(!remove_contact(&ctx, "x@example.com").await.expect("remove"));
        assert_eq!(read(&path), "Name,Email\nAda,ada@x.com\n");
        assert_eq!(std::fs::metadata(&path).expect("meta").modified().expect("mtime"), before);

        assert!(remove_contact(&ctx, "ADA@x.com").await.expect("remove"));
        assert_eq!(read(&path), "\u{feff}Name,Email\n");
    }

    #[tokio::test]
    async fn import_merges_with_single_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("contacts.csv"), "Name,Email\nAda,ada@x.com\n").expect("seed");
        let ctx = context(dir.path());
        let outcome = import_contacts(
            &ctx,
            vec![
                input("ada@x.com", "Ada Lovelace"),
                input("bob@x.com", "Bob"),
                input("", "Nobody"),
                input("BOB@x.com", "Bobby"),
            ],
        )
        .await
        .expect("import");
        assert_eq!(
            outcome,
            ImportOutcome {
                added: 1,
                updated: 2,
                skipped: 1
            }
        );
        let text = read(&dir.path().join("contacts.csv"));
        assert!(text.contains("Ada Lovelace,ada@x.com"));
        assert!(text.contains("Bobby,bob@x.com"));
    }

    #[tokio::test]
    async fn json_storage_is_used_once_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("contacts.json"), "[]").expect("seed");
        let ctx = context(dir.path());
        assert!(add_contact(&ctx, input("ada@x.com", "Ada")).await.expect("add"));
        assert!(!dir.path().join("contacts.csv").exists());
        let records: Vec<ContactRecord> =
            serde_json::from_str(&read(&dir.path().join("contacts.json"))).expect("json");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Ada");
        assert!(!remove_contact(&ctx, "nobody@x.com").await.expect("remove"));
        assert!(remove_contact(&ctx, "ada@x.com").await.expect("remove"));
    }

    #[tokio::test]
    async fn file_import_keeps_existing_values_for_blank_cells() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("contacts.csv"), "Name,Email,Phone\nAda,ada@x.com,+1555\n").expect("seed");
        let source = dir.path().join("export.csv");
        std::fs::write(&source, "Full Name,E-mail,Phone Number\nAda L,ada@x.com,\nCy,cy@x.com,555-0100\n")
            .expect("source");
        let ctx = context(dir.path());
        let outcome = import_contacts_file(&ctx, &source).await.expect("import");
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.updated, 1);
        let text = read(&dir.path().join("contacts.csv"));
        assert!(text.contains("Ada L,ada@x.com,'+1555"), "{text}");
        assert!(text.contains("Cy,cy@x.com,5550100"), "{text}");
    }
}
