//! Core modules shared by every accolade subsystem.
//!
//! Errors, deadlines, SQLite access and schemas, configuration, and logging
//! live here. The stores and the coordinator live in `plugins`.

pub mod config;
pub mod db;
pub mod deadline;
pub mod error;
pub mod logging;
pub mod pool;
pub mod schemas;
pub mod store;
pub mod time;
