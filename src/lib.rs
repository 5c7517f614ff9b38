// cargo watch -x 'fmt' -x 'test'

pub mod azure;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod output;
pub mod tools;
