//! Report output.
//!
//! - [`csv`] - CSV reports written to a file or stdout
//! - [`terminal`] - aligned tables and coloured status words

mod csv;
mod terminal;

pub use csv::{escape_csv_field, to_csv, write_csv, CsvRow};
pub use terminal::{format_field, print_table, status, summary_line, table_lines};
