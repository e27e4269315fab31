//! Embedded SQL migration runner and schema repair.
//!
//! Migrations are SQL files embedded at compile time and tracked by the
//! `_mindfulflow_migrations` table. Every migration is written with
//! `IF NOT EXISTS` so [`repair_schema`] can replay all of them when a table
//! has gone missing underneath the tracking table.

use rusqlite::Connection;
use thiserror::Error;

/// A single embedded migration.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_users",
        sql: include_str!("migrations/000_users.sql"),
    },
    Migration {
        name: "001_practice",
        sql: include_str!("migrations/001_practice.sql"),
    },
];

const TRACKING_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS _mindfulflow_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

fn bootstrap(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(TRACKING_TABLE_SQL)
        .map_err(|e| MigrationError::ExecutionFailed {
            name: "_mindfulflow_migrations_bootstrap".to_string(),
            source: e,
        })
}

/// Runs all pending migrations against the given connection.
///
/// Migrations already recorded in `_mindfulflow_migrations` are skipped.
/// Returns the number of migrations applied.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// migration tracking table cannot be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    bootstrap(conn)?;

    let mut applied = 0;

    for migration in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _mindfulflow_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(
                migration = migration.name,
                "migration already applied, skipping"
            );
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");
        apply(conn, migration, "INSERT INTO _mindfulflow_migrations (name) VALUES (?1)")?;
        applied += 1;
    }

    Ok(applied)
}

/// Replays every migration regardless of tracking state.
///
/// Used when a query reports a missing table: the tracking table may claim a
/// migration was applied while the table it created is gone.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute.
pub fn repair_schema(conn: &Connection) -> Result<(), MigrationError> {
    bootstrap(conn)?;
    for migration in MIGRATIONS {
        tracing::info!(migration = migration.name, "replaying migration for schema repair");
        apply(
            conn,
            migration,
            "INSERT OR IGNORE INTO _mindfulflow_migrations (name) VALUES (?1)",
        )?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration, record_sql: &str) -> Result<(), MigrationError> {
    let failed = |e| MigrationError::ExecutionFailed {
        name: migration.name.to_string(),
        source: e,
    };

    let tx = conn.unchecked_transaction().map_err(failed)?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(record_sql, [migration.name]).map_err(failed)?;
    tx.commit().map_err(failed)
}
