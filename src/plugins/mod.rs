//! Stores and workflow subsystems.
//!
//! - `references`: authoritative status rows and conditional transitions
//! - `documents`: schemaless achievement content with tombstones
//! - `audit`: append-only activity log
//! - `directory`: actor identity and permission checks
//! - `coordinator`: the cross-store workflow
//! - `report`: aggregate statistics

pub mod audit;
pub mod coordinator;
pub mod directory;
pub mod documents;
pub mod references;
pub mod report;
