//! Bulk load a delimited file into a SQL Server table with `sqlcmd`.
//!
//! Rows are turned into multi-row `INSERT` statements, written to a temporary
//! script per batch and executed one batch at a time. A failing batch does not
//! stop the batches after it.

use super::workflow::{Outcome, WorkflowReport};
use crate::azure::{args, CommandRunner};
use crate::config::MAX_SQL_BATCH_ROWS;
use crate::output::CsvRow;
use regex::Regex;
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

static IDENT_REGEX: OnceLock<Regex> = OnceLock::new();

fn ident_regex() -> &'static Regex {
    IDENT_REGEX
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_ ]{0,127}$").expect("Invalid Regex"))
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub file: PathBuf,
    pub server: String,
    pub database: String,
    /// `table` or `schema.table`.
    pub table: String,
    pub delimiter: char,
    pub batch_rows: usize,
    pub truncate: bool,
    /// Passed to `sqlcmd` as is, e.g. authentication switches.
    pub extra_args: Vec<String>,
    pub dry_run: bool,
}

/// A parsed record with the line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub line: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub line: usize,
    pub reason: String,
}

impl CsvRow for RejectedRow {
    fn header() -> Vec<&'static str> {
        vec!["line", "reason"]
    }

    fn fields(&self) -> Vec<String> {
        vec![self.line.to_string(), self.reason.clone()]
    }
}

#[derive(Debug)]
pub struct LoadReport {
    pub rows_read: usize,
    pub loaded: usize,
    pub rejected: Vec<RejectedRow>,
    pub batches: WorkflowReport,
}

impl LoadReport {
    pub fn has_failures(&self) -> bool {
        self.batches.has_failures()
    }

    pub fn print_summary(&self) {
        println!(
            "rows read={} loaded={} rejected={} failed batches={}",
            self.rows_read,
            self.loaded,
            self.rejected.len(),
            self.batches.failed().len()
        );
        self.batches.print_summary();
    }
}

/// Split text into records. Quoted fields may contain the delimiter, `""`
/// for a quote, and line breaks. A leading byte order mark is dropped.
pub fn parse_records(text: &str, delimiter: char) -> Result<Vec<Record>, Box<dyn Error>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut start_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                push_record(&mut records, start_line, std::mem::take(&mut fields));
                line += 1;
                start_line = line;
            }
            c if c == delimiter => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(format!("line {start_line}: unterminated quoted field").into());
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        push_record(&mut records, start_line, fields);
    }
    Ok(records)
}

fn push_record(records: &mut Vec<Record>, line: usize, fields: Vec<String>) {
    // blank line
    if fields.len() == 1 && fields[0].is_empty() {
        return;
    }
    records.push(Record { line, fields });
}

/// `[name]` for a column or table part, rejecting anything but identifiers.
pub fn quote_ident(name: &str) -> Result<String, Box<dyn Error>> {
    let name = name.trim();
    if !ident_regex().is_match(name) {
        return Err(format!("Invalid identifier '{name}'").into());
    }
    Ok(format!("[{name}]"))
}

/// `schema.table` as `[schema].[table]`.
pub fn quote_table(table: &str) -> Result<String, Box<dyn Error>> {
    let parts = table
        .split('.')
        .map(quote_ident)
        .collect::<Result<Vec<String>, _>>()?;
    if parts.len() > 2 {
        return Err(format!("Invalid table name '{table}'").into());
    }
    Ok(parts.join("."))
}

/// SQL literal for a field. Line breaks become `NCHAR(..)` so a value never
/// starts a script line, where `sqlcmd` would read `GO`, `:r` or `!!`.
pub fn sql_value(field: &str) -> String {
    if field.is_empty() {
        return "NULL".to_string();
    }
    let literal = |text: &str| format!("N'{}'", text.replace('\'', "''"));
    let mut parts = Vec::new();
    let mut text = String::new();
    for c in field.chars() {
        match c {
            '\n' | '\r' => {
                if !text.is_empty() {
                    parts.push(literal(&std::mem::take(&mut text)));
                }
                parts.push(format!("NCHAR({})", c as u32));
            }
            _ => text.push(c),
        }
    }
    if !text.is_empty() {
        parts.push(literal(&text));
    }
    parts.join(" + ")
}

/// One `INSERT` statement for a batch of rows.
pub fn insert_statement(table: &str, columns: &[String], rows: &[Record]) -> String {
    let mut sql = format!(
        "SET NOCOUNT ON;\nINSERT INTO {table} ({}) VALUES\n",
        columns.join(",")
    );
    let values: Vec<String> = rows
        .iter()
        .map(|r| {
            let v: Vec<String> = r.fields.iter().map(|f| sql_value(f)).collect();
            format!("({})", v.join(","))
        })
        .collect();
    sql.push_str(&values.join(",\n"));
    sql.push_str(";\n");
    sql
}

/// Split records into accepted rows and rejects by field count.
pub fn validate_rows(records: Vec<Record>, width: usize) -> (Vec<Record>, Vec<RejectedRow>) {
    let mut good = Vec::new();
    let mut rejected = Vec::new();
    for r in records {
        if r.fields.len() == width {
            good.push(r);
        } else {
            rejected.push(RejectedRow {
                line: r.line,
                reason: format!("expected {width} fields, found {}", r.fields.len()),
            });
        }
    }
    (good, rejected)
}

/// Load the file into the table.
///
/// Errors out before touching the database when the file or header is
/// unusable; after that, each batch is reported on its own.
pub fn load_csv<R: CommandRunner + ?Sized>(
    runner: &R,
    sqlcmd: &str,
    opts: &LoadOptions,
) -> Result<LoadReport, Box<dyn Error>> {
    let text = std::fs::read_to_string(&opts.file)
        .map_err(|e| format!("Error reading {}: {e}", opts.file.display()))?;
    let mut records = parse_records(&text, opts.delimiter)?.into_iter();
    let header = records
        .next()
        .ok_or_else(|| format!("{} has no header row", opts.file.display()))?;
    let columns = header
        .fields
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<String>, _>>()?;
    let table = quote_table(&opts.table)?;

    let (rows, rejected) = validate_rows(records.collect(), columns.len());
    log::info!(
        "#Start load of {} into {}.{table}: {} row(s), {} rejected",
        opts.file.display(),
        opts.database,
        rows.len(),
        rejected.len()
    );
    for r in &rejected {
        log::warn!("line {}: {}", r.line, r.reason);
    }

    let batch_rows = opts.batch_rows.clamp(1, MAX_SQL_BATCH_ROWS);
    let mut report = LoadReport {
        rows_read: rows.len() + rejected.len(),
        loaded: 0,
        rejected,
        batches: WorkflowReport::new("csv-load"),
    };

    if opts.truncate {
        let sql = format!("TRUNCATE TABLE {table};\n");
        if opts.dry_run {
            report
                .batches
                .push("truncate", Outcome::DryRun(sql.trim().to_string()));
        } else {
            run_script(runner, sqlcmd, opts, &sql)
                .map_err(|e| format!("Truncate of {table} failed, nothing loaded: {e}"))?;
            report.batches.push("truncate", Outcome::Succeeded(table.clone()));
        }
    }

    for (n, chunk) in rows.chunks(batch_rows).enumerate() {
        let first = chunk.first().map(|r| r.line).unwrap_or_default();
        let last = chunk.last().map(|r| r.line).unwrap_or_default();
        let label = format!("batch {} (lines {first}-{last})", n + 1);
        let sql = insert_statement(&table, &columns, chunk);
        if opts.dry_run {
            report
                .batches
                .push(label, Outcome::DryRun(format!("{} row(s)", chunk.len())));
            continue;
        }
        match run_script(runner, sqlcmd, opts, &sql) {
            Ok(_) => {
                report.loaded += chunk.len();
                report
                    .batches
                    .push(label, Outcome::Succeeded(format!("{} row(s)", chunk.len())));
            }
            Err(e) => report.batches.push(label, Outcome::failed(e)),
        }
    }
    Ok(report)
}

fn run_script<R: CommandRunner + ?Sized>(
    runner: &R,
    sqlcmd: &str,
    opts: &LoadOptions,
    sql: &str,
) -> Result<String, Box<dyn Error>> {
    let mut script = tempfile::Builder::new()
        .prefix("azops-load-")
        .suffix(".sql")
        .tempfile()?;
    script.write_all(sql.as_bytes())?;
    script.flush()?;

    let mut cmd = args([
        "-S",
        opts.server.as_str(),
        "-d",
        opts.database.as_str(),
        "-b",
        // no $(var) substitution inside values
        "-x",
        "-i",
    ]);
    cmd.push(script.path().display().to_string());
    cmd.extend(opts.extra_args.iter().cloned());
    runner.run_args(sqlcmd, &cmd)
}
