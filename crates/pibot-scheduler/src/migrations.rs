//! Versioned schema migrations.
//!
//! Migration files are named `NNN_name.sql`. The numeric prefix is the
//! version; versions are applied in ascending order, at most once each,
//! inside a single transaction, and recorded in `schema_migrations`.

use rusqlite::{Connection, params};
use std::collections::BTreeSet;

use pibot_core::error::{PiBotError, Result};

/// Migrations compiled into the binary.
const EMBEDDED: &[(&str, &str)] = &[
    (
        "001_create_reminders.sql",
        include_str!("../migrations/001_create_reminders.sql"),
    ),
    (
        "002_create_reminder_history.sql",
        include_str!("../migrations/002_create_reminder_history.sql"),
    ),
    (
        "003_add_reminder_indexes.sql",
        include_str!("../migrations/003_add_reminder_indexes.sql"),
    ),
];

const LEDGER_SQL: &str = "
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
";

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub name: String,
    pub sql: String,
}

impl Migration {
    /// Parse `NNN_name.sql`. Returns `None` when the file name has no
    /// numeric version prefix.
    pub fn from_file(file_name: &str, sql: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".sql")?;
        let (version, name) = stem.split_once('_')?;
        let version = version.parse::<u32>().ok()?;
        Some(Self {
            version,
            name: name.to_string(),
            sql: sql.to_string(),
        })
    }
}

/// Applies pending migrations to a connection.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    /// Runner over the migrations embedded in this crate.
    pub fn embedded() -> Result<Self> {
        Self::from_files(EMBEDDED.iter().copied())
    }

    /// Build a runner from `(file_name, sql)` pairs, sorted by version.
    /// Duplicate versions are rejected.
    pub fn from_files<'a, I>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut migrations = Vec::new();
        for (file_name, sql) in files {
            match Migration::from_file(file_name, sql) {
                Some(m) => migrations.push(m),
                None => tracing::warn!("Skipping migration file without version prefix: {file_name}"),
            }
        }
        migrations.sort_by_key(|m| m.version);

        if let Some(dup) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(PiBotError::Migration(format!(
                "duplicate migration version {} ({} and {})",
                dup[0].version, dup[0].name, dup[1].name
            )));
        }

        Ok(Self { migrations })
    }

    /// Known migrations in apply order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Latest known schema version.
    pub fn latest_version(&self) -> Option<u32> {
        self.migrations.last().map(|m| m.version)
    }

    /// Versions already recorded in the ledger.
    pub fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>> {
        let mut stmt = conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")
            .map_err(|e| PiBotError::Migration(format!("query applied migrations: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, u32>(0))
            .map_err(|e| PiBotError::Migration(format!("query applied migrations: {e}")))?;

        let mut applied = BTreeSet::new();
        for version in rows {
            applied.insert(
                version.map_err(|e| PiBotError::Migration(format!("scan migration version: {e}")))?,
            );
        }
        Ok(applied)
    }

    /// Apply every pending migration in one transaction.
    /// Returns the versions applied by this call.
    pub fn run(&self, conn: &mut Connection) -> Result<Vec<u32>> {
        conn.execute_batch(LEDGER_SQL)
            .map_err(|e| PiBotError::Migration(format!("init migration table: {e}")))?;

        let applied = Self::applied_versions(conn)?;
        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect();

        if pending.is_empty() {
            tracing::debug!("Schema up to date ({} migrations applied)", applied.len());
            return Ok(Vec::new());
        }

        // Dropping the transaction without commit rolls back the whole batch.
        let tx = conn
            .transaction()
            .map_err(|e| PiBotError::Migration(format!("begin transaction: {e}")))?;

        let mut newly_applied = Vec::with_capacity(pending.len());
        for migration in pending {
            tracing::info!("Applying migration {}: {}", migration.version, migration.name);
            tx.execute_batch(&migration.sql).map_err(|e| {
                PiBotError::Migration(format!(
                    "executing migration {} ({}): {e}",
                    migration.version, migration.name
                ))
            })?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                params![migration.version, migration.name],
            )
            .map_err(|e| {
                PiBotError::Migration(format!("recording migration {}: {e}", migration.version))
            })?;
            newly_applied.push(migration.version);
        }

        tx.commit()
            .map_err(|e| PiBotError::Migration(format!("commit migrations: {e}")))?;
        Ok(newly_applied)
    }
}
