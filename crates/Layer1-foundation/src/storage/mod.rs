//! Storage module for Warden
//!
//! - `db`: SQLite - runtime data (grants, counters, moderation log, executions, tasks)
//! - `json`: JSON - config files

mod db;
mod json;

pub use db::{
    ConsumeOutcome, CounterKey, CounterState, ModerationRecord, Storage, TaskRecord,
};

pub use json::JsonStore;
