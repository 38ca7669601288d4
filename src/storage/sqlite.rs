// SQLite 存储实现：profiles 表以 handle 唯一约束完成 upsert。
use crate::storage::{datetime_to_ts, ts_to_datetime, ProfileRecord, ProfileStore};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

const PROFILE_COLUMNS: &str =
    "id, handle, twitter_url, website, pfp_url, created_at, last_refreshed";

pub struct SqliteProfileStore {
    db_path: PathBuf,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
}

impl SqliteProfileStore {
    pub fn new(db_path: String) -> Self {
        let path = if db_path.trim().is_empty() {
            PathBuf::from("./data/pfpwall.db")
        } else {
            PathBuf::from(db_path)
        };
        Self {
            db_path: path,
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
        }
    }

    fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn open(&self) -> Result<Connection> {
        self.ensure_db_dir()?;
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Ok(conn)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ProfileRecord> {
        let created_at: f64 = row.get(5)?;
        let last_refreshed: Option<f64> = row.get(6)?;
        Ok(ProfileRecord {
            id: row.get(0)?,
            handle: row.get(1)?,
            twitter_url: row.get(2)?,
            website: row.get(3)?,
            pfp_url: row.get(4)?,
            created_at: ts_to_datetime(created_at),
            last_refreshed: last_refreshed.map(ts_to_datetime),
        })
    }
}

impl ProfileStore for SqliteProfileStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_guard.lock();
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
              id TEXT PRIMARY KEY,
              handle TEXT NOT NULL UNIQUE,
              twitter_url TEXT NOT NULL,
              website TEXT NOT NULL,
              pfp_url TEXT NOT NULL,
              created_at REAL NOT NULL,
              last_refreshed REAL
            );
            CREATE INDEX IF NOT EXISTS idx_profiles_created
              ON profiles (created_at);
            "#,
        )?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<ProfileRecord>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let query =
            format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at ASC, rowid ASC");
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn upsert_by_handle(&self, record: &ProfileRecord) -> Result<ProfileRecord> {
        self.ensure_initialized()?;
        let handle = record.handle.trim();
        if handle.is_empty() {
            return Err(anyhow!("profile handle is empty"));
        }
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO profiles (id, handle, twitter_url, website, pfp_url, created_at, last_refreshed) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(handle) DO UPDATE SET twitter_url = excluded.twitter_url, website = excluded.website, \
             pfp_url = excluded.pfp_url, last_refreshed = excluded.last_refreshed",
            params![
                record.id,
                handle,
                record.twitter_url,
                record.website,
                record.pfp_url,
                datetime_to_ts(&record.created_at),
                record.last_refreshed.as_ref().map(datetime_to_ts),
            ],
        )?;
        let query = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE handle = ?");
        conn.query_row(&query, params![handle], Self::map_row)
            .optional()?
            .ok_or_else(|| anyhow!("profile missing after upsert: {handle}"))
    }
}
