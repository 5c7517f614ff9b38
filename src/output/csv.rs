//! CSV report output.

use std::error::Error;
use std::io::Write;
use std::path::Path;

/// Rows that can be written as a CSV report.
pub trait CsvRow {
    fn header() -> Vec<&'static str>;
    fn fields(&self) -> Vec<String>;
}

/// Quote a field when it contains a comma, quote or line break.
///
/// No space after the separating comma, Excel does not like it.
pub fn escape_csv_field(input: &str) -> String {
    if input.contains(',') || input.contains('"') || input.contains('\n') || input.contains('\r')
    {
        format!("\"{}\"", input.replace('"', "\"\""))
    } else {
        input.to_string()
    }
}

/// Render rows, header first.
pub fn to_csv<T: CsvRow>(rows: &[T]) -> String {
    let mut out = String::new();
    out.push_str(&T::header().join(","));
    out.push('\n');
    for row in rows {
        let line: Vec<String> = row.fields().iter().map(|f| escape_csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

/// Write rows to `path`, or stdout when `None`.
pub fn write_csv<T: CsvRow>(rows: &[T], path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let text = to_csv(rows);
    match path {
        Some(p) => {
            std::fs::write(p, text)
                .map_err(|e| format!("Error writing report {}: {e}", p.display()))?;
            log::info!("Wrote {} row(s) to {}", rows.len(), p.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(text.as_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row(&'static str, u32);

    impl CsvRow for Row {
        fn header() -> Vec<&'static str> {
            vec!["name", "count"]
        }
        fn fields(&self) -> Vec<String> {
            vec![self.0.to_string(), self.1.to_string()]
        }
    }

    #[test]
    fn test_escape_csv_field() {
        assert_eq!(escape_csv_field("plain"), "plain");
        assert_eq!(escape_csv_field("a,b"), "\"a,b\"");
        assert_eq!(escape_csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_to_csv() {
        let rows = vec![Row("web,01", 2), Row("db", 1)];
        assert_eq!(to_csv(&rows), "name,count\n\"web,01\",2\ndb,1\n");
    }

    #[test]
    fn test_write_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&[Row("x", 1)], Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "name,count\nx,1\n");
    }
}
