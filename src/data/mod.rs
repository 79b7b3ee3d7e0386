//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - Store traits consumed by the federation core

mod database;
mod models;
mod store;

pub use database::Database;
pub use models::*;
pub use store::{FollowerStore, NoteStore, ReactionStore, paged};
