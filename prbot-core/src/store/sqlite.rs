//! SQLite implementation of `ReviewerStore`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Ordering
//!
//! `read_all()` returns reviewers in insertion order (`rowid`). Upserts keep
//! the original rowid, so a reviewer's position in the natural order never
//! changes after it is added.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::{validate_pool, ReviewerStore, StoreError};
use crate::reviewer::Reviewer;

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed reviewer store.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a reviewer database at the given path.
    ///
    /// Creates the database file and schema if they don't exist, and runs any
    /// pending migrations on an existing database.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for crash safety
    /// - `synchronous = FULL` so a committed pool survives power loss
    /// - `busy_timeout = 5000ms` so the CLI and server can share the file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();

        // Ensure parent directory exists (unless it's :memory: or empty path)
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";
        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;

        // Contact handles are personal data; keep the file private (Unix only)
        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite can silently stay in DELETE mode on filesystems without shared
        // memory support. In-memory databases report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| StoreError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("create schema_version table", e.to_string()))?;

        // 0 means a fresh database
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS reviewers (
                    name TEXT PRIMARY KEY NOT NULL CHECK (length(trim(name)) > 0),
                    workload INTEGER NOT NULL CHECK (workload >= 0),
                    contact_handle TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("update schema version", e.to_string()))?;

        info!("Reviewer database migrated to schema v{}", CURRENT_SCHEMA_VERSION);
        Ok(())
    }

    /// Create a new in-memory SQLite store (for testing).
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }

    /// Insert a reviewer, or update the workload and contact of an existing one.
    pub async fn upsert(&self, reviewer: Reviewer) -> Result<(), StoreError> {
        validate_pool(std::slice::from_ref(&reviewer))?;
        let workload = workload_to_sql(&reviewer)?;
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "upsert")?;
            conn.execute(
                "INSERT INTO reviewers (name, workload, contact_handle)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                     workload = excluded.workload,
                     contact_handle = excluded.contact_handle",
                params![reviewer.name, workload, reviewer.contact_handle],
            )
            .map_err(|e| StoreError::storage("upsert", e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::storage("upsert", e.to_string()))?
    }

    /// Delete a reviewer by name. Returns whether a record was removed.
    pub async fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "remove")?;
            let deleted = conn
                .execute("DELETE FROM reviewers WHERE name = ?1", params![name])
                .map_err(|e| StoreError::storage("remove", e.to_string()))?;
            Ok(deleted > 0)
        })
        .await
        .map_err(|e| StoreError::storage("remove", e.to_string()))?
    }

    /// Set every reviewer's workload to zero. Returns the number of reviewers.
    pub async fn reset_workloads(&self) -> Result<usize, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "reset_workloads")?;
            conn.execute("UPDATE reviewers SET workload = 0", [])
                .map_err(|e| StoreError::storage("reset_workloads", e.to_string()))
        })
        .await
        .map_err(|e| StoreError::storage("reset_workloads", e.to_string()))?
    }
}

#[async_trait]
impl ReviewerStore for SqliteStore {
    async fn read_all(&self) -> Result<Vec<Reviewer>, StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, "read_all")?;

            let mut stmt = conn
                .prepare("SELECT name, workload, contact_handle FROM reviewers ORDER BY rowid")
                .map_err(|e| StoreError::storage("read_all", e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|e| StoreError::storage("read_all", e.to_string()))?;

            let mut reviewers = Vec::new();
            for row in rows {
                let (name, workload, contact_handle) =
                    row.map_err(|e| StoreError::storage("read_all", e.to_string()))?;
                let workload = u64::try_from(workload)
                    .map_err(|_| StoreError::corruption(format!("workload of '{}'", name)))?;
                reviewers.push(Reviewer {
                    name,
                    workload,
                    contact_handle,
                });
            }
            Ok(reviewers)
        })
        .await
        .map_err(|e| StoreError::storage("read_all", e.to_string()))?
    }

    async fn write_all(&self, reviewers: &[Reviewer]) -> Result<(), StoreError> {
        validate_pool(reviewers)?;

        let rows = reviewers
            .iter()
            .map(|r| Ok((r.name.clone(), workload_to_sql(r)?, r.contact_handle.clone())))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn, "write_all")?;

            // Dropping the transaction without commit rolls every row back.
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("write_all", e.to_string()))?;
            {
                let mut stmt = tx
                    .prepare(
                        "UPDATE reviewers SET workload = ?2, contact_handle = ?3
                         WHERE name = ?1",
                    )
                    .map_err(|e| StoreError::storage("write_all", e.to_string()))?;

                for (name, workload, contact_handle) in &rows {
                    let updated = stmt
                        .execute(params![name, workload, contact_handle])
                        .map_err(|e| StoreError::storage("write_all", e.to_string()))?;
                    if updated == 0 {
                        debug!("Skipping write for '{}': no longer in the pool", name);
                    }
                }
            }
            tx.commit()
                .map_err(|e| StoreError::storage("write_all", e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::storage("write_all", e.to_string()))?
    }
}

fn lock<'a>(
    conn: &'a Mutex<Connection>,
    operation: &str,
) -> Result<MutexGuard<'a, Connection>, StoreError> {
    conn.lock()
        .map_err(|_| StoreError::storage(operation, "database connection lock poisoned"))
}

fn workload_to_sql(reviewer: &Reviewer) -> Result<i64, StoreError> {
    i64::try_from(reviewer.workload).map_err(|_| {
        StoreError::invalid_reviewer(format!(
            "workload {} of '{}' is too large to store",
            reviewer.workload, reviewer.name
        ))
    })
}
