use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

use super::{Agent, MailStore};

const AGENTS_QUERY: &str = "
    SELECT a.name, a.program, a.model, a.task_description, p.human_key, a.last_active_ts
    FROM agents a
    LEFT JOIN projects p ON p.id = a.project_id
    ORDER BY a.name";

/// Reads agents from the agent-mail SQLite database without ever writing.
pub struct SqliteMailStore {
    path: PathBuf,
}

impl SqliteMailStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open mail store {}", self.path.display()))
    }
}

impl MailStore for SqliteMailStore {
    fn is_available(&self) -> bool {
        self.path.is_file() && self.open().is_ok()
    }

    fn all_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(AGENTS_QUERY)
            .context("mail store has an unexpected schema")?;
        let rows = stmt.query_map([], |row| {
            Ok(Agent {
                name: row.get(0)?,
                program: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                model: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                task_description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                project_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
                last_active: row.get(5)?,
            })
        })?;

        let agents = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read agents from mail store")?;
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE projects (id INTEGER PRIMARY KEY, slug TEXT, human_key TEXT);
             CREATE TABLE agents (
                 id INTEGER PRIMARY KEY, project_id INTEGER, name TEXT NOT NULL,
                 program TEXT, model TEXT, task_description TEXT,
                 inception_ts TEXT, last_active_ts TEXT);
             INSERT INTO projects VALUES (1, 'api', '/src/api');
             INSERT INTO agents VALUES
                 (1, 1, 'GreenCastle', 'claude-code', 'opus', 'auth refactor', NULL, '2025-01-02 10:00:00'),
                 (2, 99, 'BlueLake', 'codex', NULL, NULL, NULL, NULL);",
        )
        .unwrap();
    }

    #[test]
    fn test_reads_agents_with_projects() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("storage.sqlite3");
        seed(&db);

        let store = SqliteMailStore::new(&db);
        assert!(store.is_available());
        let agents = store.all_agents().unwrap();

        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].name, "BlueLake");
        assert_eq!(agents[0].project_path, None);
        assert_eq!(agents[0].model, "");
        assert_eq!(agents[1].name, "GreenCastle");
        assert_eq!(agents[1].project_path, Some(PathBuf::from("/src/api")));
        assert_eq!(agents[1].last_active.as_deref(), Some("2025-01-02 10:00:00"));
    }

    #[test]
    fn test_missing_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMailStore::new(dir.path().join("absent.sqlite3"));
        assert!(!store.is_available());
        assert!(store.all_agents().is_err());
    }

    #[test]
    fn test_unexpected_schema_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("other.sqlite3");
        Connection::open(&db)
            .unwrap()
            .execute_batch("CREATE TABLE unrelated (id INTEGER);")
            .unwrap();

        let store = SqliteMailStore::new(&db);
        assert!(store.is_available());
        assert!(store.all_agents().is_err());
    }
}
