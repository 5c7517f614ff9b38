//! Per-item outcome tracking for tools that keep going after a failure.

use crate::error::{Stage, StageError};
use crate::output::{self, CsvRow};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(String),
    Skipped(String),
    DryRun(String),
    Failed { stage: Option<Stage>, error: String },
}

impl Outcome {
    pub fn failed(error: impl fmt::Display) -> Outcome {
        Outcome::Failed {
            stage: None,
            error: error.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Succeeded(_) => "succeeded",
            Outcome::Skipped(_) => "skipped",
            Outcome::DryRun(_) => "dry-run",
            Outcome::Failed { .. } => "failed",
        }
    }
}

impl From<StageError> for Outcome {
    fn from(e: StageError) -> Self {
        Outcome::Failed {
            stage: Some(e.stage()),
            error: e.to_string(),
        }
    }
}

/// Result for one source path, blob or vault item.
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub item: String,
    pub outcome: Outcome,
}

impl CsvRow for ItemResult {
    fn header() -> Vec<&'static str> {
        vec!["item", "status", "stage", "detail"]
    }

    fn fields(&self) -> Vec<String> {
        let (stage, detail) = match &self.outcome {
            Outcome::Succeeded(d) | Outcome::Skipped(d) | Outcome::DryRun(d) => {
                (String::new(), d.clone())
            }
            Outcome::Failed { stage, error } => (
                stage.map(|s| s.to_string()).unwrap_or_default(),
                error.clone(),
            ),
        };
        vec![
            self.item.clone(),
            self.outcome.status().to_string(),
            stage,
            detail,
        ]
    }
}

/// Outcomes of one tool run, in input order.
#[derive(Debug, Default)]
pub struct WorkflowReport {
    pub tool: &'static str,
    pub results: Vec<ItemResult>,
}

impl WorkflowReport {
    pub fn new(tool: &'static str) -> WorkflowReport {
        WorkflowReport {
            tool,
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, item: impl Into<String>, outcome: Outcome) {
        let item = item.into();
        match &outcome {
            Outcome::Failed { error, .. } => log::error!("{}: {item}: {error}", self.tool),
            other => log::info!("{}: {item}: {}", self.tool, other.status()),
        }
        self.results.push(ItemResult { item, outcome });
    }

    pub fn failed(&self) -> Vec<&ItemResult> {
        self.results.iter().filter(|r| r.outcome.is_failed()).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failed())
    }

    pub fn print_summary(&self) {
        let failed = self.failed().len();
        println!(
            "{}",
            output::summary_line(self.tool, self.results.len() - failed, failed)
        );
        for r in self.failed() {
            println!("  {} {}: {:?}", output::status("failed"), r.item, r.outcome);
        }
    }
}
