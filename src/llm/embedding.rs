//! 嵌入提供方：供记忆相似度检索使用
//!
//! OpenAiEmbedder 调用 OpenAI 兼容的 /embeddings 端点；HashEmbedder 为确定性
//! 本地实现（字符 3-gram 哈希），无 API 时与测试中使用。

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;

/// 可从 sync 上下文调用的嵌入提供方（内部用 block_on 执行 async 调用）
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为向量；失败时返回错误字符串
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 从环境变量与可选 base_url 创建（与 LLM 共用 OPENAI_API_KEY / base_url）
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    pub async fn embed_async(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        Ok(response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .unwrap_or_default())
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.to_string();
        let client = self.client.clone();
        let model = self.model.clone();
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let this = OpenAiEmbedder { client, model };
                this.embed_async(&text).await
            })
        })
    }
}

/// 嵌入维度（HashEmbedder）
const HASH_DIM: usize = 256;

/// 确定性本地嵌入：字符 3-gram 经 FNV 哈希落桶，向量归一化。
/// 质量远不及真实嵌入，但确定、无网络依赖，足以支撑检索排序的正确性。
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl EmbeddingProvider for HashEmbedder {
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, String> {
        let chars: Vec<char> = text.to_lowercase().chars().filter(|c| !c.is_whitespace()).collect();
        if chars.is_empty() {
            return Ok(vec![]);
        }
        let mut vec = vec![0.0f32; HASH_DIM];
        let n = 3usize;
        if chars.len() < n {
            let gram: String = chars.iter().collect();
            let idx = (fnv1a(gram.as_bytes()) as usize) % HASH_DIM;
            vec[idx] += 1.0;
        } else {
            for window in chars.windows(n) {
                let gram: String = window.iter().collect();
                let idx = (fnv1a(gram.as_bytes()) as usize) % HASH_DIM;
                vec[idx] += 1.0;
            }
        }
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vec.iter_mut() {
                *x /= norm;
            }
        }
        Ok(vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_deterministic() {
        let e = HashEmbedder;
        let a = e.embed_sync("查找匹配的订单记录").unwrap();
        let b = e.embed_sync("查找匹配的订单记录").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_DIM);
    }

    #[test]
    fn test_hash_embedder_empty() {
        let e = HashEmbedder;
        assert!(e.embed_sync("   ").unwrap().is_empty());
    }

    #[test]
    fn test_hash_embedder_normalized() {
        let e = HashEmbedder;
        let v = e.embed_sync("find matching records in the archive").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
