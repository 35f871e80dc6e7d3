// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Decision log: append-only SQLite record of server-side evaluations.
//
// Schema:
//   decision_log(
//     id                  INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp           TEXT    NOT NULL,   -- RFC 3339
//     stage               TEXT    NOT NULL,   -- "selection" | "dispatch" | "server"
//     tool_category       TEXT    NOT NULL,
//     user_plan           TEXT    NOT NULL,
//     file_size           INTEGER NOT NULL,
//     file_count          INTEGER NOT NULL,
//     max_file_size       INTEGER NOT NULL,
//     max_file_count      INTEGER NOT NULL,
//     reason              TEXT    NOT NULL,   -- "file_size" | "batch" | "none"
//     requires_payment    INTEGER NOT NULL,   -- 0 / 1
//     fallback_category   INTEGER NOT NULL,   -- 0 / 1
//     session_fingerprint TEXT                -- SHA-256 of the checkout session id
//   )

use std::path::Path;

use chrono::Utc;
use passgate_core::error::PassgateError;
use passgate_core::types::{EvaluationStage, PaymentRequirement};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS decision_log (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp           TEXT    NOT NULL,
    stage               TEXT    NOT NULL,
    tool_category       TEXT    NOT NULL,
    user_plan           TEXT    NOT NULL,
    file_size           INTEGER NOT NULL,
    file_count          INTEGER NOT NULL,
    max_file_size       INTEGER NOT NULL,
    max_file_count      INTEGER NOT NULL,
    reason              TEXT    NOT NULL,
    requires_payment    INTEGER NOT NULL,
    fallback_category   INTEGER NOT NULL,
    session_fingerprint TEXT
);";

const SELECT_COLUMNS: &str = "SELECT id, timestamp, stage, tool_category, user_plan, file_size,
        file_count, max_file_size, max_file_count, reason, requires_payment,
        fallback_category, session_fingerprint
 FROM decision_log";

/// Convert a `rusqlite::Error` into a `PassgateError::Database`.
fn db_err(e: rusqlite::Error) -> PassgateError {
    PassgateError::Database(e.to_string())
}

/// SQLite stores signed 64-bit integers; sizes beyond that are pinned.
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// A single row of the decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub id: i64,
    pub timestamp: String,
    pub stage: String,
    pub tool_category: String,
    pub user_plan: String,
    pub file_size: u64,
    pub file_count: u32,
    pub max_file_size: u64,
    pub max_file_count: u32,
    pub reason: String,
    pub requires_payment: bool,
    pub fallback_category: bool,
    pub session_fingerprint: Option<String>,
}

impl DecisionEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            stage: row.get(2)?,
            tool_category: row.get(3)?,
            user_plan: row.get(4)?,
            file_size: row.get::<_, i64>(5)?.max(0) as u64,
            file_count: row.get(6)?,
            max_file_size: row.get::<_, i64>(7)?.max(0) as u64,
            max_file_count: row.get(8)?,
            reason: row.get(9)?,
            requires_payment: row.get::<_, i32>(10)? != 0,
            fallback_category: row.get::<_, i32>(11)? != 0,
            session_fingerprint: row.get(12)?,
        })
    }
}

/// Append-only log of entitlement decisions.
///
/// Raw session ids never reach the database; callers pass the fingerprint
/// from [`crate::integrity::session_fingerprint`].
pub struct DecisionLog {
    conn: Connection,
}

impl DecisionLog {
    /// Open (or create) the decision database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PassgateError> {
        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL for concurrent readers.
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("decision log opened");
        Ok(Self { conn })
    }

    /// Open an in-memory decision database (useful for tests).
    pub fn open_in_memory() -> Result<Self, PassgateError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("in-memory decision log opened");
        Ok(Self { conn })
    }

    /// Record one evaluation.
    #[instrument(skip_all, fields(stage = stage.as_str(), reason = %requirement.reason()))]
    pub fn record(
        &self,
        stage: EvaluationStage,
        requirement: &PaymentRequirement,
        session_fingerprint: Option<&str>,
    ) -> Result<(), PassgateError> {
        let timestamp = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO decision_log (timestamp, stage, tool_category, user_plan, file_size,
                    file_count, max_file_size, max_file_count, reason, requires_payment,
                    fallback_category, session_fingerprint)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    timestamp,
                    stage.as_str(),
                    requirement.tool_category().as_str(),
                    requirement.user_plan().as_str(),
                    to_sql_int(requirement.file_size()),
                    requirement.file_count(),
                    to_sql_int(requirement.max_file_size()),
                    requirement.max_file_count(),
                    requirement.reason().as_str(),
                    requirement.requires_payment() as i32,
                    requirement.used_fallback_category() as i32,
                    session_fingerprint,
                ],
            )
            .map_err(db_err)?;

        debug!("decision recorded");
        Ok(())
    }

    /// All decisions for a session fingerprint, oldest first.
    pub fn entries_for_session(
        &self,
        session_fingerprint: &str,
    ) -> Result<Vec<DecisionEntry>, PassgateError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE session_fingerprint = ?1 ORDER BY id ASC"
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![session_fingerprint], DecisionEntry::from_row)
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// The most recent `limit` decisions, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<DecisionEntry>, PassgateError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![limit], DecisionEntry::from_row)
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Total number of recorded decisions.
    pub fn count(&self) -> Result<u64, PassgateError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM decision_log", [], |row| row.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
            .map_err(db_err)
    }

    /// Number of decisions that required payment.
    pub fn blocked_count(&self) -> Result<u64, PassgateError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM decision_log WHERE requires_payment = 1",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n.max(0) as u64)
            .map_err(db_err)
    }
}
