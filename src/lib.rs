//! Persistent shell-command job queue.
//!
//! Jobs live in a SQLite table. Workers lease them through an atomic claim,
//! run the command, and record the outcome: completed, retried with
//! exponential backoff, or moved to the dead letter state.

pub mod db;
pub mod models;
pub mod services;
