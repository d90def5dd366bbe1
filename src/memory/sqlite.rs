//! SQLite 持久化记忆库
//!
//! 记录落盘后跨进程可用；embedding 以 JSON 文本列保存，排序在 Rust 侧完成
//! （记录量受 max_records 约束，全量加载排序可接受）。

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use jieba_rs::Jieba;
use rusqlite::{params, Connection};

use crate::core::error::AgentError;
use crate::llm::EmbeddingProvider;
use crate::memory::store::{rank_hybrid, MemoryRecord, MemoryStore};

/// SQLite 记忆库：单连接加锁，超限按 created_at 淘汰最旧
pub struct SqliteStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_records: usize,
    jieba: Jieba,
}

impl SqliteStore {
    pub fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingProvider>,
        max_records: usize,
    ) -> Result<Self, AgentError> {
        let conn = Connection::open(path).map_err(|e| AgentError::Memory(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memory_records (
                id         TEXT PRIMARY KEY,
                goal_text  TEXT NOT NULL,
                outcome    TEXT NOT NULL,
                feedback   TEXT NOT NULL,
                embedding  TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| AgentError::Memory(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            max_records: max_records.max(1),
            jieba: Jieba::new(),
        })
    }

    fn load_all(conn: &Connection) -> Result<Vec<MemoryRecord>, AgentError> {
        let mut stmt = conn
            .prepare(
                "SELECT id, goal_text, outcome, feedback, embedding, created_at
                 FROM memory_records ORDER BY created_at ASC",
            )
            .map_err(|e| AgentError::Memory(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let embedding_json: String = row.get(4)?;
                let created_at: DateTime<Utc> = row.get(5)?;
                Ok(MemoryRecord {
                    id: row.get(0)?,
                    goal_text: row.get(1)?,
                    outcome: row.get(2)?,
                    feedback: row.get(3)?,
                    embedding: serde_json::from_str(&embedding_json).unwrap_or_default(),
                    created_at,
                })
            })
            .map_err(|e| AgentError::Memory(e.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| AgentError::Memory(e.to_string()))?);
        }
        Ok(records)
    }

    pub fn len(&self) -> Result<usize, AgentError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AgentError::Memory("sqlite lock poisoned".to_string()))?;
        conn.query_row("SELECT COUNT(*) FROM memory_records", [], |row| row.get(0))
            .map_err(|e| AgentError::Memory(e.to_string()))
    }
}

impl MemoryStore for SqliteStore {
    fn store(&self, mut record: MemoryRecord) -> Result<(), AgentError> {
        if record.embedding.is_empty() {
            record.embedding = self
                .embedder
                .embed_sync(&record.goal_text)
                .map_err(AgentError::Memory)?;
        }
        let embedding_json =
            serde_json::to_string(&record.embedding).map_err(|e| AgentError::Memory(e.to_string()))?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| AgentError::Memory("sqlite lock poisoned".to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO memory_records
             (id, goal_text, outcome, feedback, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.goal_text,
                record.outcome,
                record.feedback,
                embedding_json,
                record.created_at,
            ],
        )
        .map_err(|e| AgentError::Memory(e.to_string()))?;
        conn.execute(
            "DELETE FROM memory_records WHERE id NOT IN (
                 SELECT id FROM memory_records ORDER BY created_at DESC LIMIT ?1
             )",
            params![self.max_records as i64],
        )
        .map_err(|e| AgentError::Memory(e.to_string()))?;
        Ok(())
    }

    fn query(&self, text: &str, top_k: usize) -> Result<Vec<MemoryRecord>, AgentError> {
        let query_embedding = self.embedder.embed_sync(text).map_err(AgentError::Memory)?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| AgentError::Memory("sqlite lock poisoned".to_string()))?;
        let records = Self::load_all(&conn)?;
        let picked = rank_hybrid(&self.jieba, &records, text, &query_embedding, top_k);
        Ok(picked.into_iter().map(|i| records[i].clone()).collect())
    }
}
