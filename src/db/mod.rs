//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed entities and aggregate views returned by repositories.
//! - `repo`: SQL-only functions that return `anyhow::Result`; no defaults, no swallowing.
//!
//! Callers that want the fail-soft behaviour should go through
//! `tg_fetchbot::registry::UserRegistry` instead.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{UserRecord, UserStats};
