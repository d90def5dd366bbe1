//! LLM 客户端抽象
//!
//! 三个规划器与恢复引擎的参数修复路径都通过 LlmClient 消费语言模型：
//! complete(messages) -> 文本。后端（OpenAI 兼容 / Mock）只需实现该契约。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 一条对话消息（规划提示由 System + User 拼成）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 完成一次生成；失败时返回错误字符串，由调用方转为 AgentError::Llm
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
