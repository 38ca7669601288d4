// Postgres 存储实现：连接池 + 同步包装，语义与 SQLite 版保持一致。
use crate::storage::{datetime_to_ts, ts_to_datetime, ProfileRecord, ProfileStore};
use anyhow::{anyhow, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

const DEFAULT_POOL_SIZE: usize = 16;
const INIT_ATTEMPTS: u32 = 5;

pub struct PostgresProfileStore {
    pool: Pool,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
    fallback_runtime: tokio::runtime::Runtime,
}

struct PgConn<'a> {
    storage: &'a PostgresProfileStore,
    client: deadpool_postgres::Client,
}

impl PgConn<'_> {
    fn batch_execute(&mut self, query: &str) -> Result<()> {
        self.storage.block_on(self.client.batch_execute(query))??;
        Ok(())
    }

    fn query(&mut self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        Ok(self.storage.block_on(self.client.query(query, params))??)
    }

    fn query_one(&mut self, query: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row> {
        Ok(self
            .storage
            .block_on(self.client.query_one(query, params))??)
    }
}

impl PostgresProfileStore {
    pub fn new(dsn: String, connect_timeout_s: u64, pool_size: usize) -> Result<Self> {
        let cleaned = dsn.trim().to_string();
        if cleaned.is_empty() {
            return Err(anyhow!("postgres dsn is empty"));
        }
        let timeout = Duration::from_secs(connect_timeout_s.max(1));
        let mut config = cleaned.parse::<tokio_postgres::Config>()?;
        config.connect_timeout(timeout);
        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(config, NoTls, manager_config);
        let max_size = if pool_size == 0 {
            DEFAULT_POOL_SIZE
        } else {
            pool_size
        };
        let pool = Pool::builder(manager).max_size(max_size).build()?;
        let fallback_runtime = tokio::runtime::Runtime::new()
            .map_err(|err| anyhow!("create tokio runtime for postgres: {err}"))?;
        Ok(Self {
            pool,
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
            fallback_runtime,
        })
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
            Err(_) => Ok(self.fallback_runtime.block_on(fut)),
        }
    }

    fn conn(&self) -> Result<PgConn<'_>> {
        let client = self.block_on(self.pool.get())??;
        Ok(PgConn {
            storage: self,
            client,
        })
    }

    fn map_row(row: &Row) -> ProfileRecord {
        let created_at: f64 = row.get(5);
        let last_refreshed: Option<f64> = row.get(6);
        ProfileRecord {
            id: row.get(0),
            handle: row.get(1),
            twitter_url: row.get(2),
            website: row.get(3),
            pfp_url: row.get(4),
            created_at: ts_to_datetime(created_at),
            last_refreshed: last_refreshed.map(ts_to_datetime),
        }
    }
}

impl ProfileStore for PostgresProfileStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_guard.lock();
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = self.conn().and_then(|mut conn| {
                conn.batch_execute(
                    r#"
                    CREATE TABLE IF NOT EXISTS profiles (
                      seq BIGSERIAL,
                      id TEXT PRIMARY KEY,
                      handle TEXT NOT NULL UNIQUE,
                      twitter_url TEXT NOT NULL,
                      website TEXT NOT NULL,
                      pfp_url TEXT NOT NULL,
                      created_at DOUBLE PRECISION NOT NULL,
                      last_refreshed DOUBLE PRECISION
                    );
                    CREATE INDEX IF NOT EXISTS idx_profiles_created
                      ON profiles (created_at);
                    "#,
                )
            });
            match result {
                Ok(()) => {
                    self.initialized.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Err(err) => {
                    if attempts >= INIT_ATTEMPTS {
                        return Err(err);
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }

    fn list_all(&self) -> Result<Vec<ProfileRecord>> {
        self.ensure_initialized()?;
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT id, handle, twitter_url, website, pfp_url, created_at, last_refreshed \
             FROM profiles ORDER BY created_at ASC, seq ASC",
            &[],
        )?;
        Ok(rows.iter().map(Self::map_row).collect())
    }

    fn upsert_by_handle(&self, record: &ProfileRecord) -> Result<ProfileRecord> {
        self.ensure_initialized()?;
        let handle = record.handle.trim();
        if handle.is_empty() {
            return Err(anyhow!("profile handle is empty"));
        }
        let created_at = datetime_to_ts(&record.created_at);
        let last_refreshed = record.last_refreshed.as_ref().map(datetime_to_ts);
        let mut conn = self.conn()?;
        let row = conn.query_one(
            "INSERT INTO profiles (id, handle, twitter_url, website, pfp_url, created_at, last_refreshed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (handle) DO UPDATE SET twitter_url = EXCLUDED.twitter_url, website = EXCLUDED.website, \
             pfp_url = EXCLUDED.pfp_url, last_refreshed = EXCLUDED.last_refreshed \
             RETURNING id, handle, twitter_url, website, pfp_url, created_at, last_refreshed",
            &[
                &record.id,
                &handle,
                &record.twitter_url,
                &record.website,
                &record.pfp_url,
                &created_at,
                &last_refreshed,
            ],
        )?;
        Ok(Self::map_row(&row))
    }
}
