//! SQLite note and subscription store for Notewise.
//!
//! Holds users (with their optional push subscription) and notes (with their
//! optional reminder), and answers the reminder engine's due-reminder query
//! with a single join.

mod db;
mod error;

pub use db::{NoteDb, NoteRow};
pub use error::DbError;
