//! SQLite-backed persistence: conversation turns, bootcamp programs,
//! student registrations, and per-user enrollment session state.
//!
//! Conversation persistence is best-effort by contract: callers log append
//! failures and keep going, because losing a turn of history must never cost
//! the user a reply.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "assistant" {
            TurnRole::Assistant
        } else {
            TurnRole::User
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub created_at: i64,
}

/// Durable conversation history, keyed by the sender's wa_id.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_turn(&self, conversation: &str, role: TurnRole, text: &str) -> Result<()>;
    /// Most recent `limit` turns, oldest first.
    async fn recent_turns(&self, conversation: &str, limit: usize) -> Result<Vec<ConversationTurn>>;
}

/// Ordered steps of the enrollment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStep {
    Motivation,
    ProgramSelection,
    CollectPersonalInfo,
    ConfirmEnrollment,
    EnrollmentComplete,
}

impl EnrollmentStep {
    pub const ORDERED: [EnrollmentStep; 5] = [
        EnrollmentStep::Motivation,
        EnrollmentStep::ProgramSelection,
        EnrollmentStep::CollectPersonalInfo,
        EnrollmentStep::ConfirmEnrollment,
        EnrollmentStep::EnrollmentComplete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStep::Motivation => "motivation",
            EnrollmentStep::ProgramSelection => "program_selection",
            EnrollmentStep::CollectPersonalInfo => "collect_personal_info",
            EnrollmentStep::ConfirmEnrollment => "confirm_enrollment",
            EnrollmentStep::EnrollmentComplete => "enrollment_complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ORDERED.into_iter().find(|step| step.as_str() == s)
    }

    /// The step after this one; the final step is absorbing.
    pub fn next(self) -> Self {
        let idx = Self::ORDERED.iter().position(|s| *s == self).unwrap_or(0);
        Self::ORDERED[(idx + 1).min(Self::ORDERED.len() - 1)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: i64,
    pub program_name: String,
    pub location: String,
    /// ISO date of the next session start.
    pub start_date: String,
    pub duration_months: i64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRegistration {
    pub wa_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub age: i64,
    pub location: String,
    pub program_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered { registration_id: i64 },
    AlreadyRegistered,
}

/// Embedded SQLite store. One connection behind a mutex; every statement is
/// short, so contention is not a concern at chat volumes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation TEXT NOT NULL,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation, id);
            CREATE TABLE IF NOT EXISTS programs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                program_name TEXT NOT NULL,
                location TEXT NOT NULL,
                start_date TEXT NOT NULL,
                duration_months INTEGER NOT NULL,
                price REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS registrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                wa_id TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                phone TEXT NOT NULL,
                age INTEGER NOT NULL,
                location TEXT NOT NULL,
                program_id INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS user_sessions (
                user_id TEXT PRIMARY KEY,
                current_step TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                updated_at INTEGER NOT NULL
            );",
        )
        .context("failed to initialize database schema")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.seed_programs_if_empty()?;
        Ok(store)
    }

    fn seed_programs_if_empty(&self) -> Result<()> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM programs", [], |r| r.get(0))?;
        if count > 0 {
            return Ok(());
        }
        let seed: &[(&str, &str, &str, i64, f64)] = &[
            ("Full-Stack Web Development", "Casablanca", "2026-10-05", 6, 42000.0),
            ("Full-Stack Web Development", "Rabat", "2026-11-02", 6, 42000.0),
            ("Data Science & AI", "Casablanca", "2026-10-19", 7, 48000.0),
            ("Cybersecurity Fundamentals", "Rabat", "2027-01-11", 5, 38000.0),
            ("Mobile Development", "Casablanca", "2027-02-01", 6, 42000.0),
        ];
        for (name, location, start, months, price) in seed {
            conn.execute(
                "INSERT INTO programs (program_name, location, start_date, duration_months, price)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, location, start, months, price],
            )?;
        }
        Ok(())
    }

    fn row_to_program(row: &rusqlite::Row<'_>) -> rusqlite::Result<Program> {
        Ok(Program {
            id: row.get(0)?,
            program_name: row.get(1)?,
            location: row.get(2)?,
            start_date: row.get(3)?,
            duration_months: row.get(4)?,
            price: row.get(5)?,
        })
    }

    pub fn list_programs(&self) -> Result<Vec<Program>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, program_name, location, start_date, duration_months, price
             FROM programs ORDER BY start_date",
        )?;
        let rows = stmt.query_map([], Self::row_to_program)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Case-insensitive substring search over program name and location.
    pub fn search_programs(&self, term: &str) -> Result<Vec<Program>> {
        let pattern = format!("%{}%", term.trim());
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, program_name, location, start_date, duration_months, price
             FROM programs
             WHERE program_name LIKE ?1 COLLATE NOCASE
                OR location LIKE ?1 COLLATE NOCASE
             ORDER BY start_date",
        )?;
        let rows = stmt.query_map([pattern], Self::row_to_program)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn program_by_id(&self, id: i64) -> Result<Option<Program>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT id, program_name, location, start_date, duration_months, price
                 FROM programs WHERE id = ?1",
                [id],
                Self::row_to_program,
            )
            .optional()?)
    }

    pub fn register_student(&self, reg: &NewRegistration) -> Result<RegistrationOutcome> {
        let conn = self.conn.lock();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM registrations WHERE wa_id = ?1 OR email = ?2",
                params![reg.wa_id, reg.email],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }
        conn.execute(
            "INSERT INTO registrations
                (wa_id, first_name, last_name, email, phone, age, location, program_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                reg.wa_id,
                reg.first_name,
                reg.last_name,
                reg.email,
                reg.phone,
                reg.age,
                reg.location,
                reg.program_id,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(RegistrationOutcome::Registered {
            registration_id: conn.last_insert_rowid(),
        })
    }

    pub fn user_step(&self, user_id: &str) -> Result<EnrollmentStep> {
        let conn = self.conn.lock();
        let stored: Option<String> = conn
            .query_row(
                "SELECT current_step FROM user_sessions WHERE user_id = ?1",
                [user_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(stored
            .as_deref()
            .and_then(EnrollmentStep::parse)
            .unwrap_or(EnrollmentStep::Motivation))
    }

    pub fn set_user_step(&self, user_id: &str, step: EnrollmentStep) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_sessions (user_id, current_step, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET current_step = ?2, updated_at = ?3",
            params![user_id, step.as_str(), Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn advance_user_step(&self, user_id: &str) -> Result<EnrollmentStep> {
        let next = self.user_step(user_id)?.next();
        self.set_user_step(user_id, next)?;
        Ok(next)
    }

    /// Merge a key/value pair into the session's collected-info blob.
    pub fn update_user_info(&self, user_id: &str, field: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM user_sessions WHERE user_id = ?1",
                [user_id],
                |r| r.get(0),
            )
            .optional()?;
        let mut data: serde_json::Map<String, serde_json::Value> = raw
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
            .unwrap_or_default();
        data.insert(field.to_string(), serde_json::Value::String(value.to_string()));
        let rendered = serde_json::Value::Object(data).to_string();
        conn.execute(
            "INSERT INTO user_sessions (user_id, current_step, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET data = ?3, updated_at = ?4",
            params![
                user_id,
                EnrollmentStep::Motivation.as_str(),
                rendered,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn user_info(&self, user_id: &str) -> Result<serde_json::Value> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM user_sessions WHERE user_id = ?1",
                [user_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
            .unwrap_or_else(|| serde_json::json!({})))
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append_turn(&self, conversation: &str, role: TurnRole, text: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO turns (conversation, role, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![conversation, role.as_str(), text, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    async fn recent_turns(
        &self,
        conversation: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT role, text, created_at FROM turns
             WHERE conversation = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut turns: Vec<ConversationTurn> = stmt
            .query_map(params![conversation, limit as i64], |row| {
                let role: String = row.get(0)?;
                Ok(ConversationTurn {
                    role: TurnRole::parse(&role),
                    text: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }
}
