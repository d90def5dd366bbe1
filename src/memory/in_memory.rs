//! 进程内记忆库（默认实现，也用于测试）

use std::sync::{Arc, RwLock};

use jieba_rs::Jieba;

use crate::core::error::AgentError;
use crate::llm::EmbeddingProvider;
use crate::memory::store::{rank_hybrid, MemoryRecord, MemoryStore};

/// 进程内记忆库：Vec 按写入序保存，超限淘汰最旧记录
pub struct InMemoryStore {
    embedder: Arc<dyn EmbeddingProvider>,
    records: RwLock<Vec<MemoryRecord>>,
    max_records: usize,
    jieba: Jieba,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, max_records: usize) -> Self {
        Self {
            embedder,
            records: RwLock::new(Vec::new()),
            max_records: max_records.max(1),
            jieba: Jieba::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryStore for InMemoryStore {
    fn store(&self, mut record: MemoryRecord) -> Result<(), AgentError> {
        if record.embedding.is_empty() {
            record.embedding = self
                .embedder
                .embed_sync(&record.goal_text)
                .map_err(AgentError::Memory)?;
        }
        let mut records = self
            .records
            .write()
            .map_err(|_| AgentError::Memory("memory lock poisoned".to_string()))?;
        records.push(record);
        while records.len() > self.max_records {
            records.remove(0);
        }
        Ok(())
    }

    fn query(&self, text: &str, top_k: usize) -> Result<Vec<MemoryRecord>, AgentError> {
        let query_embedding = self.embedder.embed_sync(text).map_err(AgentError::Memory)?;
        let records = self
            .records
            .read()
            .map_err(|_| AgentError::Memory("memory lock poisoned".to_string()))?;
        let picked = rank_hybrid(&self.jieba, &records, text, &query_embedding, top_k);
        Ok(picked.into_iter().map(|i| records[i].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashEmbedder;

    fn store() -> InMemoryStore {
        InMemoryStore::new(Arc::new(HashEmbedder::default()), 100)
    }

    #[test]
    fn test_empty_store_returns_empty_not_error() {
        let s = store();
        let hits = s.query("anything at all", 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_query_returns_at_most_k() {
        let s = store();
        for i in 0..10 {
            s.store(MemoryRecord::new(format!("goal {}", i), "succeeded", "ok"))
                .unwrap();
        }
        let hits = s.query("goal", 5).unwrap();
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn test_semantically_closer_record_ranks_first() {
        let s = store();
        s.store(MemoryRecord::new(
            "查询北京明天的天气预报",
            "succeeded",
            "用 weather 工具直接命中",
        ))
        .unwrap();
        s.store(MemoryRecord::new(
            "compile the rust project",
            "failed",
            "toolchain missing",
        ))
        .unwrap();
        let hits = s.query("查询上海明天的天气预报", 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].goal_text.contains("天气"));
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let s = InMemoryStore::new(Arc::new(HashEmbedder::default()), 3);
        for i in 0..5 {
            s.store(MemoryRecord::new(format!("goal {}", i), "succeeded", "ok"))
                .unwrap();
        }
        assert_eq!(s.len(), 3);
        let hits = s.query("goal 4", 3).unwrap();
        assert!(hits.iter().any(|r| r.goal_text == "goal 4"));
        assert!(hits.iter().all(|r| r.goal_text != "goal 0"));
    }
}
