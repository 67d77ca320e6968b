//! Key-value storage scopes backing the token store and form snapshots.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A string key-value scope.
pub trait Scope: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>>;

  fn set(&self, key: &str, value: &str) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;

  /// Keys beginning with `prefix`.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Scope that lives as long as the process (the tab-lifetime session).
#[derive(Debug, Default)]
pub struct MemoryScope {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryScope {
  pub fn new() -> Self {
    Self::default()
  }

  fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
    self.values.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Scope for MemoryScope {
  fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.values().get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    self.values().insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.values().remove(key);
    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    Ok(
      self
        .values()
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect(),
    )
  }
}

/// Scope persisted in one table of a SQLite database.
///
/// Several scopes may share a database file; each gets its own table.
pub struct SqliteScope {
  conn: Arc<Mutex<Connection>>,
  table: &'static str,
}

/// An open session database from which scopes are carved.
#[derive(Clone)]
pub struct SessionDatabase {
  conn: Arc<Mutex<Connection>>,
}

impl SessionDatabase {
  /// Open or create the database, at `path` or the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open session database at {}: {}", path.display(), e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// In-memory database, mainly for tests.
  #[allow(dead_code)]
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("clubgate").join("session.db"))
  }

  /// A scope stored in `table`, created if missing.
  pub fn scope(&self, table: &'static str) -> Result<SqliteScope> {
    let scope = SqliteScope {
      conn: Arc::clone(&self.conn),
      table,
    };
    scope.run_migrations()?;
    Ok(scope)
  }
}

impl SqliteScope {
  fn conn(&self) -> MutexGuard<'_, Connection> {
    self.conn.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn run_migrations(&self) -> Result<()> {
    let schema = format!(
      "CREATE TABLE IF NOT EXISTS {} (
           key TEXT PRIMARY KEY,
           value TEXT NOT NULL,
           written_at TEXT NOT NULL DEFAULT (datetime('now'))
       );",
      self.table
    );

    self
      .conn()
      .execute_batch(&schema)
      .map_err(|e| eyre!("Failed to create scope table {}: {}", self.table, e))
  }
}

impl Scope for SqliteScope {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let sql = format!("SELECT value FROM {} WHERE key = ?", self.table);
    self
      .conn()
      .query_row(&sql, params![key], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to read {} from {}: {}", key, self.table, e))
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let sql = format!(
      "INSERT OR REPLACE INTO {} (key, value, written_at) VALUES (?, ?, datetime('now'))",
      self.table
    );
    self
      .conn()
      .execute(&sql, params![key, value])
      .map_err(|e| eyre!("Failed to write {} to {}: {}", key, self.table, e))?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let sql = format!("DELETE FROM {} WHERE key = ?", self.table);
    self
      .conn()
      .execute(&sql, params![key])
      .map_err(|e| eyre!("Failed to delete {} from {}: {}", key, self.table, e))?;
    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
    let sql = format!("SELECT key FROM {} WHERE substr(key, 1, ?) = ?", self.table);
    let conn = self.conn();
    let mut stmt = conn
      .prepare(&sql)
      .map_err(|e| eyre!("Failed to prepare key scan: {}", e))?;

    let keys = stmt
      .query_map(params![prefix.chars().count() as i64, prefix], |row| {
        row.get::<_, String>(0)
      })
      .map_err(|e| eyre!("Failed to scan keys in {}: {}", self.table, e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(scope: &dyn Scope) {
    assert_eq!(scope.get("token").unwrap(), None);
    scope.set("token", "abc").unwrap();
    scope.set("token", "def").unwrap();
    assert_eq!(scope.get("token").unwrap().as_deref(), Some("def"));
    scope.set("form:a", "{}").unwrap();
    scope.set("form:b", "{}").unwrap();
    let mut keys = scope.keys_with_prefix("form:").unwrap();
    keys.sort();
    assert_eq!(keys, vec!["form:a", "form:b"]);
    scope.remove("token").unwrap();
    scope.remove("token").unwrap();
    assert_eq!(scope.get("token").unwrap(), None);
  }

  #[test]
  fn test_memory_scope() {
    exercise(&MemoryScope::new());
  }

  #[test]
  fn test_sqlite_scope() {
    let db = SessionDatabase::in_memory().unwrap();
    exercise(&db.scope("session_scope").unwrap());
  }

  #[test]
  fn test_sqlite_tables_are_isolated() {
    let db = SessionDatabase::in_memory().unwrap();
    let session = db.scope("session_scope").unwrap();
    let durable = db.scope("durable_scope").unwrap();
    durable.set("token", "legacy").unwrap();
    assert_eq!(session.get("token").unwrap(), None);
  }

  #[test]
  fn test_sqlite_scope_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.db");
    {
      let db = SessionDatabase::open(Some(&path)).unwrap();
      db.scope("durable_scope").unwrap().set("token", "kept").unwrap();
    }
    let db = SessionDatabase::open(Some(&path)).unwrap();
    let durable = db.scope("durable_scope").unwrap();
    assert_eq!(durable.get("token").unwrap().as_deref(), Some("kept"));
  }
}
