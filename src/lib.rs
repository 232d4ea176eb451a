//! KIUF bot - Telegram bot of Korea International University in Fergana
//!
//! Serves applicants with admission and university information and gives
//! administrators a feedback inbox with threaded replies, broadcasts,
//! exports and backups.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging and CSV export
//! - `storage`: Database, migrations and backups
//! - `i18n`: Uzbek, English and Russian texts
//! - `telegram`: Telegram bot integration, reply correlation and handlers
//! - `cli`: Command line interface

pub mod cli;
pub mod core;
pub mod i18n;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
pub use telegram::{schema, HandlerDeps};
