use crate::errors::AppResult;
use crate::models::Grid;
use once_cell::sync::Lazy;
use regex::Regex;

const BOM: char = '\u{feff}';
const FORMULA_PREFIXES: [char; 4] = ['=', '+', '-', '@'];

static COMMAND_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdde\b|\|").expect("valid command pattern regex"));

/// Cleans raw file text before it reaches the CSV reader: leading BOM, NUL bytes, and
/// `\r\n` / `\r` line endings all normalize to a single `\n` convention.
pub fn sanitize_content(text: &str) -> String {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\0' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Collapses embedded line breaks to a space and drops control characters other than tab.
pub fn normalize_cell(cell: &str) -> String {
    let mut out = String::with_capacity(cell.len());
    let mut chars = cell.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push(' ');
            }
            '\n' => out.push(' '),
            '\t' => out.push(ch),
            c if (c as u32) < 0x20 => {}
            _ => out.push(ch),
        }
    }
    out
}

fn needs_escape(cell: &str) -> bool {
    let Some(first) = cell.chars().next() else {
        return false;
    };
    if FORMULA_PREFIXES.contains(&first) || COMMAND_PATTERN.is_match(cell) {
        return true;
    }
    // An already-escaped looking value gets a second apostrophe so reading it back
    // strips exactly one.
    first == '\'' && needs_escape(&cell[1..])
}

/// Neutralizes spreadsheet formula evaluation for a single cell.
pub fn sanitize_cell(cell: &str) -> String {
    let normalized = normalize_cell(cell);
    if needs_escape(&normalized) {
        format!("'{}", normalized)
    } else {
        normalized
    }
}

/// Reverses the apostrophe escape added by [`sanitize_cell`]. Leading apostrophes that
/// do not guard a formula-like value are left alone.
pub fn desanitize_cell(cell: &str) -> String {
    match cell.strip_prefix('\'') {
        Some(rest) if needs_escape(rest) => rest.to_string(),
        _ => cell.to_string(),
    }
}

/// Parses CSV text into a grid, desanitizing every cell. Blank physical lines are skipped.
pub fn parse_grid(text: &str) -> AppResult<Grid> {
    let content = sanitize_content(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record?;
        grid.push(record.iter().map(desanitize_cell).collect::<Vec<_>>());
    }
    Ok(grid)
}

/// Encodes a grid to CSV text with every cell sanitized.
pub fn encode_grid(grid: &Grid) -> AppResult<String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for row in grid {
        if row.is_empty() {
            continue;
        }
        writer.write_record(row.iter().map(|cell| sanitize_cell(cell)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|error| crate::errors::AppError::Io(error.to_string()))?;
    String::from_utf8(bytes).map_err(|error| crate::errors::AppError::Internal(error.to_string()))
}

pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix(BOM).unwrap_or(text)
}

pub fn with_bom(text: &str) -> String {
    if text.starts_with(BOM) {
        text.to_string()
    } else {
        format!("{}{}", BOM, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_cells_round_trip_through_escape() {
        let encoded = sanitize_cell("=SUM(A1:A10)");
        assert_eq!(encoded, "'=SUM(A1:A10)");
        assert_eq!(desanitize_cell(&encoded), "=SUM(A1:A10)");

        for value in ["+1555", "-42", "@handle"] {
            let encoded = sanitize_cell(value);
            assert!(encoded.starts_with('\''));
            assert_eq!(desanitize_cell(&encoded), value);
        }
    }

    #[test]
    fn command_patterns_are_escaped_anywhere_in_the_cell() {
        assert_eq!(sanitize_cell("cmd|' /C calc'!A0"), "'cmd|' /C calc'!A0");
        assert_eq!(sanitize_cell("call DDE now"), "'call DDE now");
        assert_eq!(desanitize_cell("'cmd|' /C calc'!A0"), "cmd|' /C calc'!A0");
        assert_eq!(sanitize_cell("ddex"), "ddex");
    }

    #[test]
    fn line_breaks_collapse_and_control_chars_drop() {
        assert_eq!(sanitize_cell("a\r\nb\nc\rd"), "a b c d");
        assert_eq!(sanitize_cell("a\u{0007}b\tc"), "ab\tc");
    }

    #[test]
    fn ordinary_leading_apostrophes_survive() {
        assert_eq!(desanitize_cell("'quoted"), "'quoted");
        assert_eq!(sanitize_cell("'quoted"), "'quoted");
    }

    #[test]
    fn desanitize_inverts_sanitize_for_normalized_text() {
        let samples = [
            "", "plain", "=1+2", "'=already", "''=deep", "a|b", "'a|b", "-", "'", "x@y", "DDE",
            "O'Brien",
        ];
        for sample in samples {
            let normalized = normalize_cell(sample);
            assert_eq!(desanitize_cell(&sanitize_cell(&normalized)), normalized, "{sample}");
        }
    }

    #[test]
    fn content_sanitizer_strips_bom_nulls_and_carriage_returns() {
        let cleaned = sanitize_content("\u{feff}a,b\r\nc\0,d\re,f");
        assert_eq!(cleaned, "a,b\nc,d\ne,f");
    }

    #[test]
    fn grid_round_trips_quoted_commas() {
        let grid = vec![
            vec!["Name".to_string(), "Comment".to_string()],
            vec!["srv".to_string(), "one, two".to_string()],
        ];
        let text = encode_grid(&grid).expect("encode");
        assert!(text.contains("\"one, two\""));
        assert_eq!(parse_grid(&text).expect("parse"), grid);
    }

    #[test]
    fn parse_keeps_ragged_rows() {
        let grid = parse_grid("\u{feff}A,B,C\r\n1\r\n2,3\r\n").expect("parse");
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[1], vec!["1"]);
        assert_eq!(grid[2], vec!["2", "3"]);
    }

    #[test]
    fn bom_is_added_once() {
        let once = with_bom("a,b\n");
        assert_eq!(with_bom(&once), once);
        assert_eq!(strip_bom(&once), "a,b\n");
    }
}
