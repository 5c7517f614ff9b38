//! Terminal output helpers.

use super::csv::CsvRow;
use colored::{ColoredString, Colorize};

/// Format a value as a quoted, right-aligned field.
pub fn format_field<T: ToString>(value: T, width: usize) -> String {
    let quoted = format!("\"{}\"", value.to_string());
    if quoted.len() >= width {
        quoted
    } else {
        format!("{quoted:>width$}")
    }
}

/// Colour a status word: green for success, yellow for skipped work, red otherwise.
pub fn status(word: &str) -> ColoredString {
    match word {
        "succeeded" => word.green(),
        "skipped" | "dry-run" => word.yellow(),
        _ => word.red(),
    }
}

/// One line summary, e.g. `archive: 3 ok, 1 failed`.
pub fn summary_line(tool: &str, ok: usize, failed: usize) -> String {
    let failed_str = format!("{failed} failed");
    format!(
        "{tool}: {} ok, {}",
        ok,
        if failed > 0 {
            failed_str.on_red().to_string()
        } else {
            failed_str
        }
    )
}

/// Rows as aligned, quoted fields with the header first.
pub fn table_lines<T: CsvRow>(rows: &[T]) -> Vec<String> {
    let header = T::header();
    let fields: Vec<Vec<String>> = rows.iter().map(|r| r.fields()).collect();
    let widths: Vec<usize> = (0..header.len())
        .map(|i| {
            fields
                .iter()
                .filter_map(|f| f.get(i))
                .map(|f| f.len())
                .chain([header[i].len()])
                .max()
                .unwrap_or_default()
                + 2
        })
        .collect();
    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format_field(c, *w))
            .collect::<Vec<String>>()
            .join(" ")
    };
    let mut lines = vec![line(header.iter().map(|h| h.to_string()).collect())];
    lines.extend(fields.into_iter().map(line));
    lines
}

pub fn print_table<T: CsvRow>(rows: &[T]) {
    for l in table_lines(rows) {
        println!("{l}");
    }
}
