use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

use crate::kv::KvBackend;
use crate::Result;

/// Durable key-value backend on a single SQLite table.
pub struct SqliteKv {
    conn: Connection,
}

impl SqliteKv {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open trace cache: {}", db_path.display()))?;

        let kv = Self { conn };
        kv.init_schema()?;
        Ok(kv)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let kv = Self { conn };
        kv.init_schema()?;
        Ok(kv)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        Ok(())
    }
}

impl KvBackend for SqliteKv {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET
                value = ?2,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )?;

        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_round_trip() {
        let mut kv = SqliteKv::open_in_memory().unwrap();
        kv.write("agent-trace-cache", "{}").unwrap();
        kv.write("agent-trace-cache", "{\"a\":1}").unwrap();
        assert_eq!(
            kv.read("agent-trace-cache").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        kv.remove("agent-trace-cache").unwrap();
        assert_eq!(kv.read("agent-trace-cache").unwrap(), None);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let mut kv = SqliteKv::open(&path).unwrap();
            kv.write("k", "v").unwrap();
        }

        let mut kv = SqliteKv::open(&path).unwrap();
        assert_eq!(kv.read("k").unwrap().as_deref(), Some("v"));
        kv.clear().unwrap();
        assert_eq!(kv.read("k").unwrap(), None);
    }
}
