use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// Durable key holding the JSON array of post ids this device has liked.
pub const LIKED_POSTS_KEY: &str = "likedPosts";

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        get_value(&conn, key)
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            bail!("storage: key required");
        }
        let conn = self.conn.lock();
        set_value(&conn, key, value)
    }

    /// Post ids liked from this device, in the order they were liked.
    pub fn liked_posts(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        read_liked(&conn)
    }

    pub fn is_liked(&self, post_id: &str) -> Result<bool> {
        Ok(self.liked_posts()?.iter().any(|id| id == post_id))
    }

    /// Records a like. Returns `false` when the id was already present; the set never shrinks.
    pub fn add_liked_post(&self, post_id: &str) -> Result<bool> {
        if post_id.is_empty() {
            bail!("storage: post id required");
        }
        let conn = self.conn.lock();
        let mut liked = read_liked(&conn)?;
        if liked.iter().any(|id| id == post_id) {
            return Ok(false);
        }
        liked.push(post_id.to_string());
        let encoded =
            serde_json::to_string(&liked).context("storage: encode liked posts")?;
        set_value(&conn, LIKED_POSTS_KEY, &encoded)?;
        Ok(true)
    }
}

fn get_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM kv WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("storage: read key {key}"))
}

fn set_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO kv (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
        params![key, value, Utc::now().timestamp()],
    )
    .with_context(|| format!("storage: write key {key}"))?;
    Ok(())
}

fn read_liked(conn: &Connection) -> Result<Vec<String>> {
    let Some(raw) = get_value(conn, LIKED_POSTS_KEY)? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(ids) => Ok(ids),
        Err(err) => {
            tracing::warn!(error = %err, "storage: liked posts value is not a JSON list, ignoring");
            Ok(Vec::new())
        }
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("galleria").join("state.db"))
}
