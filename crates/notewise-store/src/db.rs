//! SQLite database for notes, reminders and push subscriptions.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use notewise_reminders::{
    DeliveryWindow, DueReminder, EXCERPT_CHARS, ReminderStore, StoreError,
};

use crate::DbError;

/// SQLite-backed note store.
#[derive(Clone)]
pub struct NoteDb {
    conn: Arc<Mutex<Connection>>,
}

/// A note row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub has_reminder: bool,
    pub reminder_at: Option<DateTime<Utc>>,
}

impl NoteDb {
    /// Open or create the SQLite database.
    pub fn open(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self::init(conn)?;
        info!(path = %path, "note database initialized");
        Ok(db)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                push_subscription TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                has_reminder INTEGER NOT NULL DEFAULT 0,
                reminder_at INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                CHECK (
                    (has_reminder = 0 AND reminder_at IS NULL)
                    OR (has_reminder = 1 AND reminder_at IS NOT NULL)
                )
            );
            CREATE INDEX IF NOT EXISTS idx_notes_reminder ON notes(has_reminder, reminder_at);
            CREATE INDEX IF NOT EXISTS idx_notes_user ON notes(user_id);
            ",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Create a user and return its id.
    pub fn create_user(&self, email: &str) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO users (email) VALUES (?1)", params![email])?;
        Ok(conn.last_insert_rowid())
    }

    /// Store a user's serialized push subscription, replacing any previous one.
    pub fn set_push_subscription(&self, user_id: i64, subscription: &str) -> Result<(), DbError> {
        self.update_push_subscription(user_id, Some(subscription))
    }

    /// Remove a user's push subscription.
    pub fn clear_push_subscription(&self, user_id: i64) -> Result<(), DbError> {
        self.update_push_subscription(user_id, None)
    }

    fn update_push_subscription(
        &self,
        user_id: i64,
        subscription: Option<&str>,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE users SET push_subscription = ?2 WHERE id = ?1",
            params![user_id, subscription],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound {
                kind: "user",
                id: user_id,
            });
        }
        debug!(user_id, subscribed = subscription.is_some(), "updated push subscription");
        Ok(())
    }

    /// A user's serialized push subscription.
    pub fn push_subscription(&self, user_id: i64) -> Result<Option<String>, DbError> {
        let conn = self.conn()?;
        let row: Option<Option<String>> = conn
            .query_row(
                "SELECT push_subscription FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        row.ok_or(DbError::NotFound {
            kind: "user",
            id: user_id,
        })
    }

    // =========================================================================
    // Notes
    // =========================================================================

    /// Create a note without a reminder and return its id.
    pub fn create_note(&self, user_id: i64, title: &str, content: &str) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notes (user_id, title, content) VALUES (?1, ?2, ?3)",
            params![user_id, title, content],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Turn a note's reminder on, due at `at`.
    pub fn set_reminder(&self, note_id: i64, at: DateTime<Utc>) -> Result<(), DbError> {
        self.update_reminder(note_id, Some(at))
    }

    /// Turn a note's reminder off.
    pub fn clear_reminder(&self, note_id: i64) -> Result<(), DbError> {
        self.update_reminder(note_id, None)
    }

    fn update_reminder(&self, note_id: i64, at: Option<DateTime<Utc>>) -> Result<(), DbError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE notes
             SET has_reminder = ?2, reminder_at = ?3, updated_at = datetime('now')
             WHERE id = ?1",
            params![note_id, at.is_some(), at.map(|t| t.timestamp_millis())],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound {
                kind: "note",
                id: note_id,
            });
        }
        Ok(())
    }

    /// Get a note by id.
    pub fn note(&self, note_id: i64) -> Result<Option<NoteRow>, DbError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, user_id, title, content, has_reminder, reminder_at
                 FROM notes WHERE id = ?1",
                params![note_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(id, user_id, title, content, has_reminder, reminder_ms)| -> Result<NoteRow, DbError> {
                Ok(NoteRow {
                    id,
                    user_id,
                    title,
                    content,
                    has_reminder,
                    reminder_at: reminder_ms.map(|ms| from_millis(id, ms)).transpose()?,
                })
            },
        )
        .transpose()
    }

    // =========================================================================
    // Reminders
    // =========================================================================

    /// All reminders due in `(after_ms, until_ms]`, joined with the owner's
    /// push subscription, in one query.
    pub fn due_reminders_between(
        &self,
        after_ms: i64,
        until_ms: i64,
    ) -> Result<Vec<DueReminder>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT n.id, n.title, substr(n.content, 1, ?3), n.user_id, u.push_subscription, n.reminder_at
             FROM notes n
             JOIN users u ON u.id = n.user_id
             WHERE n.has_reminder = 1
               AND n.reminder_at > ?1
               AND n.reminder_at <= ?2
             ORDER BY n.reminder_at, n.id",
        )?;

        let rows = stmt
            .query_map(params![after_ms, until_ms, EXCERPT_CHARS as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(note_id, title, body_excerpt, recipient_id, subscription, due_ms)| -> Result<DueReminder, DbError> {
                    Ok(DueReminder {
                        note_id,
                        title,
                        body_excerpt,
                        recipient_id,
                        subscription,
                        due_at: from_millis(note_id, due_ms)?,
                    })
                },
            )
            .collect()
    }
}

fn from_millis(note_id: i64, millis: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_millis(millis).ok_or(DbError::InvalidReminder { note_id, millis })
}

#[async_trait]
impl ReminderStore for NoteDb {
    async fn due_reminders(
        &self,
        window: &DeliveryWindow,
    ) -> Result<Vec<DueReminder>, StoreError> {
        // Stored timestamps are whole milliseconds, so flooring both bounds
        // keeps `(after, until]` exact.
        let after_ms = window.after.timestamp_millis();
        let until_ms = window.until.timestamp_millis();
        let db = self.clone();

        let reminders = tokio::task::spawn_blocking(move || {
            db.due_reminders_between(after_ms, until_ms)
        })
        .await
        .map_err(DbError::from)??;

        Ok(reminders)
    }
}
