use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tokio::task;

use crate::error::{OntoKgError, Result};

/// Migrations compiled into the binary: (version, name, sql).
const MIGRATIONS: &[(u32, &str, &str)] = &[(
    1,
    "001_graph_tables",
    r#"
    CREATE TABLE entities (
        namespace TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        label TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        aliases_json TEXT,
        attributes_json TEXT,
        PRIMARY KEY (namespace, entity_id)
    );
    CREATE TABLE relations (
        namespace TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        relation TEXT NOT NULL,
        object_id TEXT NOT NULL,
        PRIMARY KEY (namespace, subject_id, relation, object_id),
        FOREIGN KEY (namespace, subject_id) REFERENCES entities(namespace, entity_id) ON DELETE CASCADE,
        FOREIGN KEY (namespace, object_id) REFERENCES entities(namespace, entity_id) ON DELETE CASCADE
    );
    CREATE INDEX idx_relations_object ON relations(namespace, object_id);
    CREATE TABLE handoffs (
        namespace TEXT PRIMARY KEY,
        run_id TEXT NOT NULL,
        entity_count INTEGER NOT NULL,
        triple_count INTEGER NOT NULL,
        written_at TEXT NOT NULL
    );
    "#,
)];

/// SQLite connection manager for a graph database file
pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection with WAL journaling and foreign keys enabled
    pub fn open_connection(&self) -> Result<Connection> {
        open(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = open(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| OntoKgError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    /// Apply all pending migrations
    pub async fn migrate(&self) -> Result<()> {
        self.with_connection(|conn| run_migrations(conn)).await
    }
}

fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    ensure_migrations_table(conn)?;
    let applied = applied_migrations(conn)?;

    for (version, name, sql) in MIGRATIONS {
        if applied.iter().any(|a| a == name) {
            log::debug!("Migration {} already applied, skipping", name);
            continue;
        }

        log::info!("Applying migration: {} (version {})", name, version);
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
    }

    Ok(())
}
