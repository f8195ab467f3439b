//! SQLite persistence for imported records and the token index.

pub mod cache;
pub mod repo;
pub mod schema;
pub mod tokens;

use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::types::ToSql;
use rusqlite::{ffi, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

use crate::database::schema::SCHEMA;

/// Opens (or creates) the database and applies the schema.
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path).context("Failed to open database")?;
    // Another process (a scrape import, a scheduled rebuild) may hold the
    // write lock briefly.
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(SCHEMA).context("Failed to initialize schema")?;
    Ok(conn)
}

/// Starts a write transaction that holds the write lock from BEGIN, so a
/// concurrent writer waits out the busy timeout instead of failing with
/// `SQLITE_BUSY` on a read-then-write upgrade.
pub fn begin_write(conn: &mut Connection) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .context("Failed to begin transaction")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// UNIQUE or PRIMARY KEY: the row already exists.
    Unique,
    /// CHECK: the value itself was refused.
    Check,
    Other,
}

/// Classifies a constraint violation by its extended result code.
pub fn constraint_kind(err: &rusqlite::Error) -> Option<ConstraintKind> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Some(match e.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    ConstraintKind::Unique
                }
                ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
                _ => ConstraintKind::Other,
            })
        }
        _ => None,
    }
}

/// Looks up a row id by natural key, inserting the row when absent.
pub(crate) fn get_or_create(
    conn: &Connection,
    select_sql: &str,
    key: &str,
    insert_sql: &str,
    insert_params: &[&dyn ToSql],
) -> rusqlite::Result<i64> {
    let existing = conn
        .prepare_cached(select_sql)?
        .query_row([key], |row| row.get(0))
        .optional()?;
    match existing {
        Some(id) => Ok(id),
        None => insert_or_refetch(conn, select_sql, key, insert_sql, insert_params),
    }
}

/// Inserts a row; if someone else created it first, returns their id.
pub(crate) fn insert_or_refetch(
    conn: &Connection,
    select_sql: &str,
    key: &str,
    insert_sql: &str,
    insert_params: &[&dyn ToSql],
) -> rusqlite::Result<i64> {
    match conn.prepare_cached(insert_sql)?.execute(insert_params) {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if constraint_kind(&e) == Some(ConstraintKind::Unique) => {
            debug!("{:?} created concurrently, re-reading", key);
            conn.prepare_cached(select_sql)?
                .query_row([key], |row| row.get(0))
        }
        Err(e) => Err(e),
    }
}

/// Row count of every known table.
pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    schema::TABLES
        .iter()
        .map(|table| {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .with_context(|| format!("Failed to count {}", table))?;
            Ok((*table, count))
        })
        .collect()
}
