//! Persistence for the guild channels the bot autoresponds in.
//!
//! One SQLite table keyed by `(guild_id, channel_id)`. The connection lives
//! behind a mutex and every query runs on the blocking pool, so callers on
//! the event loop never stall on disk IO.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::StoreError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS webfic_autoresponse_settings (
    guild_id    INTEGER     NOT NULL,
    channel_id  INTEGER     NOT NULL,
    PRIMARY KEY (guild_id, channel_id)
) STRICT, WITHOUT ROWID;
";

/// A channel in a guild where link autoresponses are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AutoresponseLocation {
    pub guild_id: u64,
    pub channel_id: u64,
}

impl AutoresponseLocation {
    pub fn new(guild_id: u64, channel_id: u64) -> Self {
        Self { guild_id, channel_id }
    }
}

/// Handle to the settings database. Cheap to clone.
#[derive(Clone)]
pub struct SettingsStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore").finish_non_exhaustive()
    }
}

impl SettingsStore {
    /// Open (or create) a file-backed store and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        info!(path = %path.display(), "opened autoresponse settings database");
        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Every enabled location across all guilds.
    pub async fn all(&self) -> Result<Vec<AutoresponseLocation>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT guild_id, channel_id FROM webfic_autoresponse_settings ORDER BY guild_id, channel_id",
            )?;
            let rows = stmt.query_map([], row_to_location)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// The enabled locations for one guild.
    pub async fn by_guild(&self, guild_id: u64) -> Result<Vec<AutoresponseLocation>, StoreError> {
        self.run(move |conn| select_by_guild(conn, guild_id)).await
    }

    /// Whether autoresponses are enabled for this exact channel.
    pub async fn contains(&self, location: AutoresponseLocation) -> Result<bool, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT 1 FROM webfic_autoresponse_settings WHERE guild_id = ?1 AND channel_id = ?2",
            )?;
            Ok(stmt.exists(params![to_sql_id(location.guild_id), to_sql_id(location.channel_id)])?)
        })
        .await
    }

    /// Enable the given locations, returning the guild's locations afterwards.
    ///
    /// The guild is taken from the first location; an empty slice is a no-op
    /// that returns an empty list.
    pub async fn add(&self, locations: Vec<AutoresponseLocation>) -> Result<Vec<AutoresponseLocation>, StoreError> {
        let Some(guild_id) = locations.first().map(|l| l.guild_id) else {
            return Ok(Vec::new());
        };
        self.run(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO webfic_autoresponse_settings (guild_id, channel_id)
                     VALUES (?1, ?2)
                     ON CONFLICT (guild_id, channel_id) DO NOTHING",
                )?;
                for loc in &locations {
                    stmt.execute(params![to_sql_id(loc.guild_id), to_sql_id(loc.channel_id)])?;
                }
            }
            tx.commit()?;
            debug!(guild_id, count = locations.len(), "added autoresponse channels");
            select_by_guild(conn, guild_id)
        })
        .await
    }

    /// Disable the given locations, returning the guild's locations afterwards.
    pub async fn remove(&self, locations: Vec<AutoresponseLocation>) -> Result<Vec<AutoresponseLocation>, StoreError> {
        let Some(guild_id) = locations.first().map(|l| l.guild_id) else {
            return Ok(Vec::new());
        };
        self.run(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "DELETE FROM webfic_autoresponse_settings WHERE guild_id = ?1 AND channel_id = ?2",
                )?;
                for loc in &locations {
                    stmt.execute(params![to_sql_id(loc.guild_id), to_sql_id(loc.channel_id)])?;
                }
            }
            tx.commit()?;
            debug!(guild_id, count = locations.len(), "dropped autoresponse channels");
            select_by_guild(conn, guild_id)
        })
        .await
    }

    /// Disable every location in a guild.
    pub async fn clear(&self, guild_id: u64) -> Result<(), StoreError> {
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM webfic_autoresponse_settings WHERE guild_id = ?1",
                params![to_sql_id(guild_id)],
            )?;
            debug!(guild_id, removed, "cleared autoresponse channels");
            Ok(())
        })
        .await
    }

    async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn);
            f(&mut guard)
        })
        .await?
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    // A panic mid-query leaves SQLite itself consistent; keep serving.
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn select_by_guild(conn: &Connection, guild_id: u64) -> Result<Vec<AutoresponseLocation>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT guild_id, channel_id FROM webfic_autoresponse_settings WHERE guild_id = ?1 ORDER BY channel_id",
    )?;
    let rows = stmt.query_map(params![to_sql_id(guild_id)], row_to_location)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn row_to_location(row: &rusqlite::Row<'_>) -> rusqlite::Result<AutoresponseLocation> {
    Ok(AutoresponseLocation {
        guild_id: from_sql_id(row.get(0)?),
        channel_id: from_sql_id(row.get(1)?),
    })
}

// Snowflakes use 63 bits at most, so the sign bit never carries data.
fn to_sql_id(id: u64) -> i64 {
    id as i64
}

fn from_sql_id(id: i64) -> u64 {
    id as u64
}
