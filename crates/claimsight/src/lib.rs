#![forbid(unsafe_code)]

pub mod anomaly;
pub mod catalog;
pub mod cli;
pub mod compile;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod sqlite;
pub mod utils;
pub mod validate;

pub use cli::app::{Cli, Command};
