use super::{is_blank_row, raw_row, search_string, ParseOutcome};
use crate::headers::{canonicalize_header, HeaderMatcher, CONTACT_FIELDS};
use crate::models::{Contact, ContactRecord, DatasetKind, Grid, StructuredError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static PHONE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:[,;/]|\bor\b)\s*").expect("valid phone separator regex"));
static PHONE_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:ext\.?|x)\s*(\d+)\s*$").expect("valid phone extension regex"));

/// Strips punctuation from each number in a phone cell, keeping a leading `+` and any
/// trailing extension. Parts without digits, or with letters other than the extension
/// marker (`555-0100 (desk)`, `1-800-FLOWERS`), are kept verbatim.
pub fn normalize_phone(value: &str) -> String {
    let trimmed = value.trim();
    if !trimmed.chars().any(|ch| ch.is_ascii_digit()) {
        return trimmed.to_string();
    }
    PHONE_SEPARATOR
        .split(trimmed)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(normalize_phone_part)
        .collect::<Vec<_>>()
        .join(", ")
}

fn normalize_phone_part(part: &str) -> String {
    let (number, extension) = match PHONE_EXTENSION.captures(part) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.start()).unwrap_or(part.len());
            (&part[..whole], caps.get(1).map(|m| m.as_str()))
        }
        None => (part, None),
    };

    let digits = number.chars().filter(char::is_ascii_digit).collect::<String>();
    if digits.is_empty() || number.chars().any(char::is_alphabetic) {
        return part.to_string();
    }
    let plus = number
        .chars()
        .find(|ch| *ch == '+' || ch.is_ascii_digit())
        .is_some_and(|ch| ch == '+');

    let mut out = String::with_capacity(digits.len() + 8);
    if plus {
        out.push('+');
    }
    out.push_str(&digits);
    if let Some(extension) = extension {
        out.push_str(" x");
        out.push_str(extension);
    }
    out
}

pub fn parse_contacts(mut grid: Grid) -> ParseOutcome<Contact> {
    if grid.is_empty() {
        return ParseOutcome::empty();
    }
    let mut outcome = ParseOutcome::empty();
    let mut dirty = canonicalize_header(&mut grid[0], CONTACT_FIELDS, &[]);
    let header = grid[0].clone();
    let matcher = HeaderMatcher::resolve(&header, CONTACT_FIELDS);

    if !matcher.has("email") {
        outcome.warnings.push(StructuredError::warning(
            DatasetKind::Contacts,
            0,
            "contacts header has no email column",
        ));
    }

    let phone_index = matcher.index("phone");
    let mut seen = HashSet::new();
    for (row_index, row) in grid.iter_mut().enumerate().skip(1) {
        if is_blank_row(row) {
            continue;
        }

        if let Some(index) = phone_index {
            if let Some(cell) = row.get_mut(index) {
                let cleaned = normalize_phone(cell);
                if cleaned != *cell {
                    *cell = cleaned;
                    dirty = true;
                }
            }
        }

        let name = matcher.cell(row, "name").to_string();
        let email = matcher.cell(row, "email").to_string();
        let phone = matcher.cell(row, "phone").to_string();
        let title = matcher.cell(row, "title").to_string();

        if email.is_empty() {
            outcome.warnings.push(StructuredError::warning(
                DatasetKind::Contacts,
                row_index,
                format!("contact '{}' has no email", name),
            ));
        } else if !email.contains('@') {
            outcome.warnings.push(StructuredError::warning(
                DatasetKind::Contacts,
                row_index,
                format!("'{}' does not look like an email address", email),
            ));
        } else if !seen.insert(email.to_lowercase()) {
            outcome.warnings.push(StructuredError::warning(
                DatasetKind::Contacts,
                row_index,
                format!("duplicate contact email '{}'", email),
            ));
        }

        outcome.records.push(Contact {
            search_string: search_string(&[&name, &email, &phone, &title]),
            raw: raw_row(&header, row),
            name,
            email,
            phone,
            title,
        });
    }

    if dirty {
        outcome.repaired = Some(grid);
    }
    outcome
}

pub fn from_records(records: &[ContactRecord]) -> Vec<Contact> {
    records
        .iter()
        .map(|record| Contact {
            name: record.name.clone(),
            email: record.email.clone(),
            phone: record.phone.clone(),
            title: record.title.clone(),
            search_string: search_string(&[&record.name, &record.email, &record.phone, &record.title]),
            raw: Default::default(),
        })
        .collect()
}
