use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{KeyLookup, StoreError, UsageRecorder};
use crate::models::api_key::ApiKey;
use crate::models::catalog::CatalogEntry;
use crate::models::usage::{DashboardStats, KeyUsage, RecentUsage, UsageRecord};
use crate::residency::ResidencyClass;

/// SQLite-backed store. One connection, short independent statements.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
            Connection::open(path)?
        };

        conn.execute(
            "CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                key_hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS usage_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key_id TEXT NOT NULL,
                model TEXT,
                prompt_tokens INTEGER NOT NULL,
                eval_tokens INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS catalog (
                name TEXT PRIMARY KEY,
                size_bytes INTEGER,
                residency TEXT NOT NULL,
                last_seen TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_usage_log_key_id ON usage_log(key_id)",
            [],
        )?;

        tracing::info!("Store initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Insert a new key. Names and emails need not be unique.
    pub fn create_api_key(&self, name: &str, email: &str, key_hash: &str) -> Result<ApiKey, StoreError> {
        let key = ApiKey::new(name.to_string(), email.to_string());
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO api_keys (id, name, email, key_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key.id, key.name, key.email, key_hash, key.created_at.to_rfc3339()],
        )?;

        tracing::info!("Created API key {} for {} <{}>", key.id, key.name, key.email);
        Ok(key)
    }

    pub fn dashboard_stats(&self, recent_limit: u32) -> Result<DashboardStats, StoreError> {
        let conn = self.conn()?;

        let total_keys: i64 = conn.query_row("SELECT COUNT(*) FROM api_keys", [], |row| row.get(0))?;

        let (total_requests, tokens_prompt, tokens_eval): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(prompt_tokens), 0), COALESCE(SUM(eval_tokens), 0) FROM usage_log",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT k.id, k.name, k.email, COUNT(u.id),
                    COALESCE(SUM(u.prompt_tokens), 0), COALESCE(SUM(u.eval_tokens), 0)
             FROM api_keys k
             LEFT JOIN usage_log u ON u.key_id = k.id
             GROUP BY k.id
             ORDER BY COUNT(u.id) DESC, k.created_at ASC",
        )?;
        let per_key = stmt
            .query_map([], |row| {
                Ok(KeyUsage {
                    key_id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    requests: row.get::<_, i64>(3)? as u64,
                    prompt_tokens: row.get::<_, i64>(4)? as u64,
                    eval_tokens: row.get::<_, i64>(5)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT u.key_id, k.name, u.model, u.prompt_tokens, u.eval_tokens, u.timestamp
             FROM usage_log u
             LEFT JOIN api_keys k ON k.id = u.key_id
             ORDER BY u.id DESC
             LIMIT ?1",
        )?;
        let recent = stmt
            .query_map(params![recent_limit], |row| {
                Ok(RecentUsage {
                    key_id: row.get(0)?,
                    key_name: row.get(1)?,
                    model: row.get(2)?,
                    prompt_tokens: row.get::<_, i64>(3)? as u64,
                    eval_tokens: row.get::<_, i64>(4)? as u64,
                    timestamp: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DashboardStats {
            total_keys: total_keys as u64,
            total_requests: total_requests as u64,
            tokens_prompt: tokens_prompt as u64,
            tokens_eval: tokens_eval as u64,
            per_key,
            recent,
        })
    }

    /// Replace the whole catalog with a fresh snapshot.
    pub fn replace_catalog(&self, entries: &[CatalogEntry]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM catalog", [])?;
        for entry in entries {
            tx.execute(
                "INSERT INTO catalog (name, size_bytes, residency, last_seen) VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.name,
                    entry.size_bytes.map(|v| v as i64),
                    entry.residency.as_str(),
                    entry.last_seen.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;

        tracing::debug!("Catalog replaced with {} entries", entries.len());
        Ok(())
    }

    pub fn list_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT name, size_bytes, residency, last_seen FROM catalog ORDER BY name",
        )?;
        let entries = stmt
            .query_map([], |row| {
                let residency: String = row.get(2)?;
                let last_seen: String = row.get(3)?;
                Ok(CatalogEntry {
                    name: row.get(0)?,
                    size_bytes: row.get::<_, Option<i64>>(1)?.map(|v| v as u64),
                    residency: ResidencyClass::parse(&residency).unwrap_or(ResidencyClass::Transient),
                    last_seen: parse_timestamp(&last_seen),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

impl KeyLookup for Store {
    fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let conn = self.conn()?;

        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT id, name, email, created_at FROM api_keys WHERE key_hash = ?1",
                params![key_hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        Ok(row.map(|(id, name, email, created_at)| ApiKey {
            id,
            name,
            email,
            created_at: parse_timestamp(&created_at),
        }))
    }
}

impl UsageRecorder for Store {
    fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO usage_log (key_id, model, prompt_tokens, eval_tokens, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.key_id,
                record.model,
                record.prompt_tokens as i64,
                record.eval_tokens as i64,
                record.timestamp.to_rfc3339(),
            ],
        )?;

        tracing::debug!("Recorded usage for key {}", record.key_id);
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
