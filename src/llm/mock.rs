//! Mock LLM 客户端（无需 API）
//!
//! MockLlmClient 按提示词中的规划层级返回最小合法 JSON 分解，便于离线跑通
//! 完整的 目标 -> 规划 -> 执行 流程；ScriptedLlm 按队列顺序回放脚本（测试用）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：识别规划提示并返回结构化分解，回退为回显
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if prompt.contains("strategic phases") {
            return Ok(r#"[
  {"title": "Gather context", "description": "Collect the information the goal refers to"},
  {"title": "Act on the goal", "description": "Perform the core actions the goal requires"},
  {"title": "Verify outcome", "description": "Check the result against the goal"}
]"#
            .to_string());
        }
        if prompt.contains("concrete tasks") {
            return Ok(r#"[
  {"title": "Do the work", "description": "Carry out this phase with the available tools"}
]"#
            .to_string());
        }
        if prompt.contains("tool invocation steps") {
            return Ok(r#"[
  {"title": "Echo progress", "description": "Report progress", "tool": "echo", "args": {"text": "working on it"}}
]"#
            .to_string());
        }
        if prompt.contains("corrected arguments") {
            return Ok("{}".to_string());
        }

        Ok(format!("Echo from Mock: {}", prompt))
    }
}

/// 脚本客户端：按入队顺序逐条返回；队列空时返回错误（测试可据此发现脚本缺口）
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    /// 追加一条脚本响应
    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(response.into());
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        self.responses
            .lock()
            .map_err(|_| "script lock poisoned".to_string())?
            .pop_front()
            .ok_or_else(|| "script exhausted".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_strategic_output_is_json() {
        let llm = MockLlmClient;
        let out = llm
            .complete(&[Message::user("Decompose into 3-5 strategic phases")])
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(parsed.as_array().map(|a| a.len() == 3).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_scripted_order_and_exhaustion() {
        let llm = ScriptedLlm::new(vec!["a".into(), "b".into()]);
        assert_eq!(llm.complete(&[]).await.unwrap(), "a");
        assert_eq!(llm.complete(&[]).await.unwrap(), "b");
        assert!(llm.complete(&[]).await.is_err());
    }
}
