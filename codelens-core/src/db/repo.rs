//! Repository for database operations

use crate::error::Result;
use crate::providers::ProviderKind;
use crate::quota::QuotaWindow;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Main database handle
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Quota windows
    // ============================================

    /// Write a window's running totals, creating the row if needed.
    pub fn upsert_quota_window(&self, window: &QuotaWindow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO quota_windows
                (user_id, provider_id, period, request_count, token_count, cost, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, provider_id, period) DO UPDATE SET
                request_count = excluded.request_count,
                token_count = excluded.token_count,
                cost = excluded.cost,
                updated_at = excluded.updated_at",
            params![
                window.user_id,
                window.provider.as_str(),
                window.period,
                window.request_count as i64,
                window.token_count as i64,
                window.cost,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All windows recorded for a period. Rows for providers no longer in the
    /// catalog are skipped.
    pub fn quota_windows_for_period(&self, period: &str) -> Result<Vec<QuotaWindow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id, provider_id, period, request_count, token_count, cost
             FROM quota_windows
             WHERE period = ?1
             ORDER BY user_id, provider_id",
        )?;

        let rows = stmt.query_map(params![period], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?;

        let mut windows = Vec::new();
        for row in rows {
            let (user_id, provider_id, period, requests, tokens, cost) = row?;
            match provider_id.parse::<ProviderKind>() {
                Ok(provider) => windows.push(QuotaWindow {
                    user_id,
                    provider,
                    period,
                    request_count: requests.max(0) as u64,
                    token_count: tokens.max(0) as u64,
                    cost,
                }),
                Err(_) => {
                    tracing::warn!(provider_id = %provider_id, "Skipping quota row for unknown provider");
                }
            }
        }
        Ok(windows)
    }
}
