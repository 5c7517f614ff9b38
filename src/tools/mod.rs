//! One module per operational tool.

pub mod archive;
pub mod connectivity;
pub mod csv_load;
pub mod dns_reconcile;
pub mod keyvault_backup;
pub mod reservations;
pub mod restore;
pub mod route_table;
pub mod workflow;

pub use workflow::{ItemResult, Outcome, WorkflowReport};
