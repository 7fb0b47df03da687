//! Article store: persistent proof that an item id has been processed.
//!
//! The refresh engine uses `exists` to deduplicate listed ids and `record`
//! to persist each new item before any push attempt. Records are never
//! mutated or deleted by the engine; `get`/`list` serve the read-side API.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::adapter::ItemDetail;
use crate::envelope::Envelope;

/// One dedup record. `id` is the adapter-class-prefixed source item id and
/// globally unique across adapter types.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub id: String,
    pub user_id: String,
    pub ts: i64,
    pub content: Envelope,
}

impl Article {
    pub fn from_detail(id: impl Into<String>, detail: &ItemDetail) -> Self {
        Self {
            id: id.into(),
            user_id: detail.user_id.clone(),
            ts: detail.ts,
            content: detail.content.clone(),
        }
    }
}

pub trait ArticleStore: Send + Sync {
    fn exists(&self, id: &str) -> Result<bool>;
    /// Insert exactly once; a duplicate id is an error.
    fn record(&self, article: &Article) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<Article>>;
    /// Newest first.
    fn list(&self, page: usize, page_size: usize) -> Result<Vec<Article>>;
}

/// Sqlite-backed store; the engine's default.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening article db {}", path.as_ref().display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS articles (
                id      TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                ts      INTEGER NOT NULL,
                content TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_article(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, i64, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }
}

impl ArticleStore for SqliteStore {
    fn exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    fn record(&self, article: &Article) -> Result<()> {
        let content = serde_json::to_string(&article.content)?;
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO articles (id, user_id, ts, content) VALUES (?1, ?2, ?3, ?4)",
            params![article.id, article.user_id, article.ts, content],
        )
        .with_context(|| format!("recording article {}", article.id))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Article>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT id, user_id, ts, content FROM articles WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => {
                let (id, user_id, ts, content) = Self::row_to_article(row)?;
                Ok(Some(Article {
                    id,
                    user_id,
                    ts,
                    content: serde_json::from_str(&content)?,
                }))
            }
            None => Ok(None),
        }
    }

    fn list(&self, page: usize, page_size: usize) -> Result<Vec<Article>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, user_id, ts, content FROM articles
             ORDER BY ts DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![page_size as i64, (page * page_size) as i64], |row| {
            Self::row_to_article(row)
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, user_id, ts, content) = row?;
            out.push(Article {
                id,
                user_id,
                ts,
                content: serde_json::from_str(&content)?,
            });
        }
        Ok(out)
    }
}

/// In-process store for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Article>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArticleStore for MemoryStore {
    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .expect("store mutex poisoned")
            .contains_key(id))
    }

    fn record(&self, article: &Article) -> Result<()> {
        let mut map = self.inner.lock().expect("store mutex poisoned");
        if map.contains_key(&article.id) {
            anyhow::bail!("article {} already recorded", article.id);
        }
        map.insert(article.id.clone(), article.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Article>> {
        Ok(self
            .inner
            .lock()
            .expect("store mutex poisoned")
            .get(id)
            .cloned())
    }

    fn list(&self, page: usize, page_size: usize) -> Result<Vec<Article>> {
        let map = self.inner.lock().expect("store mutex poisoned");
        let mut all: Vec<Article> = map.values().cloned().collect();
        all.sort_by_key(|a| std::cmp::Reverse(a.ts));
        Ok(all
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .collect())
    }
}
