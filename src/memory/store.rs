//! 记忆记录与存取协作方
//!
//! 目标执行结束后归档一条 MemoryRecord；新目标规划前按语义召回 top-k。
//! 排序为混合检索：embedding 余弦相似度与 jieba 关键词重合度各排一榜，
//! RRF（k=60）融合。

use chrono::{DateTime, Utc};
use jieba_rs::Jieba;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::core::error::AgentError;

/// 一次目标执行的归档记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    /// 目标原文
    pub goal_text: String,
    /// 终态："succeeded" / "failed" / "cancelled" / "needs_clarification"
    pub outcome: String,
    /// 策略与诊断摘要，召回时注入规划上下文
    pub feedback: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(goal_text: impl Into<String>, outcome: impl Into<String>, feedback: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal_text: goal_text.into(),
            outcome: outcome.into(),
            feedback: feedback.into(),
            embedding: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// 召回注入提示的单行渲染
    pub fn render(&self) -> String {
        format!("[{}] {} => {}", self.outcome, self.goal_text, self.feedback)
    }
}

/// 记忆存取协作方：归档失败不阻断目标执行，调用方仅记日志
pub trait MemoryStore: Send + Sync {
    fn store(&self, record: MemoryRecord) -> Result<(), AgentError>;
    fn query(&self, text: &str, top_k: usize) -> Result<Vec<MemoryRecord>, AgentError>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

pub(crate) fn tokenize(jieba: &Jieba, text: &str) -> HashSet<String> {
    jieba
        .cut(text, false)
        .into_iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty() && w.chars().any(|c| c.is_alphanumeric()))
        .collect()
}

const RRF_K: f32 = 60.0;

/// 混合排序：语义榜与关键词榜 RRF 融合，返回 top-k 的下标
pub(crate) fn rank_hybrid(
    jieba: &Jieba,
    records: &[MemoryRecord],
    query_text: &str,
    query_embedding: &[f32],
    top_k: usize,
) -> Vec<usize> {
    if records.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let mut semantic: Vec<(usize, f32)> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (i, cosine_similarity(query_embedding, &r.embedding)))
        .collect();
    semantic.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let query_tokens = tokenize(jieba, query_text);
    let mut keyword: Vec<(usize, f32)> = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let doc_tokens = tokenize(jieba, &format!("{} {}", r.goal_text, r.feedback));
            let overlap = query_tokens.intersection(&doc_tokens).count() as f32;
            (i, overlap)
        })
        .collect();
    keyword.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut fused: HashMap<usize, f32> = HashMap::new();
    for (rank, (i, _)) in semantic.iter().enumerate() {
        *fused.entry(*i).or_default() += 1.0 / (RRF_K + rank as f32 + 1.0);
    }
    for (rank, (i, score)) in keyword.iter().enumerate() {
        // 无任何词重合的文档不从关键词榜拿分
        if *score > 0.0 {
            *fused.entry(*i).or_default() += 1.0 / (RRF_K + rank as f32 + 1.0);
        }
    }

    let mut ranked: Vec<(usize, f32)> = fused.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.into_iter().take(top_k).map(|(i, _)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_basics() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) > 0.99);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
    }

    #[test]
    fn test_tokenize_mixed_language() {
        let jieba = Jieba::new();
        let tokens = tokenize(&jieba, "查询订单 order status");
        assert!(tokens.contains("order"));
        assert!(tokens.contains("订单"));
    }
}
