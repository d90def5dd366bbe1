//! 三层规划共用的分解协议
//!
//! 统一流程：构造提示 -> LLM -> 提取 JSON -> 解析草稿节点 -> 数量约束。
//! 输出为空是该节点的致命规划错误，直接上抛（由上层换策略处理）；非空但
//! 不足 min 时带提示重试一次（重试后非空即接受）；超出上限时将溢出项并入
//! 最后一个保留项；depends_on 只允许指向更早的兄弟（非法下标丢弃）。

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::plan::Strategy;

/// 规划上下文：策略、目标文本、召回的记忆与此前尝试的失败备注
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub strategy: Strategy,
    pub goal_text: String,
    pub memory_lines: Vec<String>,
    pub failure_notes: Vec<String>,
}

impl PlanContext {
    pub fn new(strategy: Strategy, goal_text: impl Into<String>) -> Self {
        Self {
            strategy,
            goal_text: goal_text.into(),
            memory_lines: Vec::new(),
            failure_notes: Vec::new(),
        }
    }

    /// 渲染注入提示的上下文段落（记忆与失败备注，空则为空串）
    pub fn render_context(&self) -> String {
        let mut out = String::new();
        if !self.memory_lines.is_empty() {
            out.push_str("Relevant past executions:\n");
            for line in &self.memory_lines {
                out.push_str("- ");
                out.push_str(line);
                out.push('\n');
            }
        }
        if !self.failure_notes.is_empty() {
            out.push_str("Earlier attempts at this goal failed:\n");
            for note in &self.failure_notes {
                out.push_str("- ");
                out.push_str(note);
                out.push('\n');
            }
        }
        out
    }
}

/// LLM 输出的草稿节点，三层通用；Task 层用 depends_on，Step 层用 tool/args
#[derive(Debug, Clone, Deserialize)]
pub struct DraftNode {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 兄弟下标依赖，仅允许指向更早的兄弟
    #[serde(default)]
    pub depends_on: Vec<usize>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default = "empty_object")]
    pub args: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// 分解结果：草稿列表，或目标含糊时待用户回答的问题
#[derive(Debug, Clone)]
pub enum DecomposeOutcome {
    Nodes(Vec<DraftNode>),
    Clarify(String),
}

/// 从 LLM 输出中提取 JSON 文本：优先 ``` 围栏，其次首个括号配对
pub fn extract_json(text: &str) -> Option<String> {
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if !inner.is_empty() {
                return Some(inner.to_string());
            }
        }
    }

    let array_start = text.find('[');
    let object_start = text.find('{');
    let (open, close) = match (array_start, object_start) {
        (Some(a), Some(o)) if a < o => (a, text.rfind(']')?),
        (Some(_), Some(o)) => (o, text.rfind('}')?),
        (Some(a), None) => (a, text.rfind(']')?),
        (None, Some(o)) => (o, text.rfind('}')?),
        (None, None) => return None,
    };
    if close <= open {
        return None;
    }
    Some(text[open..=close].trim().to_string())
}

fn parse_output(output: &str) -> Result<DecomposeOutcome, AgentError> {
    let json_str = extract_json(output)
        .ok_or_else(|| AgentError::Planning("no JSON in planner output".to_string()))?;
    let value: Value = serde_json::from_str(&json_str)
        .map_err(|e| AgentError::Planning(format!("malformed planner JSON: {}", e)))?;

    if let Some(question) = value.get("clarify").and_then(|q| q.as_str()) {
        return Ok(DecomposeOutcome::Clarify(question.to_string()));
    }
    let nodes: Vec<DraftNode> = serde_json::from_value(value)
        .map_err(|e| AgentError::Planning(format!("planner output is not a node array: {}", e)))?;
    Ok(DecomposeOutcome::Nodes(nodes))
}

/// 数量约束：超出 max 时把溢出项并入最后一个保留项；depends_on 清理非法下标
fn constrain(mut nodes: Vec<DraftNode>, max: usize, level_name: &str) -> Vec<DraftNode> {
    if nodes.len() > max {
        warn!(
            level = level_name,
            produced = nodes.len(),
            max,
            "分解超出上限，溢出项并入最后一项"
        );
        let overflow: Vec<DraftNode> = nodes.split_off(max);
        if let Some(last) = nodes.last_mut() {
            for extra in overflow {
                last.description.push_str("; then ");
                last.description.push_str(&extra.title);
                if !extra.description.is_empty() {
                    last.description.push_str(": ");
                    last.description.push_str(&extra.description);
                }
            }
        }
    }
    for (idx, node) in nodes.iter_mut().enumerate() {
        node.depends_on.retain(|&dep| dep < idx);
        node.depends_on.dedup();
    }
    nodes
}

/// 一轮分解调用；空输出直接报 Planning 错误，非空但不足 min 时重试一次
/// （重试后非空即接受）
pub async fn decompose(
    llm: &dyn LlmClient,
    system_prompt: &str,
    user_prompt: &str,
    min: usize,
    max: usize,
    level_name: &str,
) -> Result<DecomposeOutcome, AgentError> {
    let output = llm
        .complete(&[Message::system(system_prompt), Message::user(user_prompt)])
        .await
        .map_err(AgentError::Llm)?;

    let outcome = parse_output(&output)?;
    let nodes = match outcome {
        DecomposeOutcome::Clarify(q) => return Ok(DecomposeOutcome::Clarify(q)),
        DecomposeOutcome::Nodes(nodes) => nodes,
    };

    if nodes.len() >= min {
        return Ok(DecomposeOutcome::Nodes(constrain(nodes, max, level_name)));
    }
    // 空输出不做本地重试，交上层换策略
    if nodes.is_empty() {
        return Err(AgentError::Planning(format!(
            "{} decomposition produced no nodes",
            level_name
        )));
    }

    warn!(level = level_name, produced = nodes.len(), min, "分解数量不足，重试一次");
    let retry_prompt = format!(
        "{}\n\nYour previous answer had only {} entries; produce at least {}.",
        user_prompt,
        nodes.len(),
        min
    );
    let output = llm
        .complete(&[Message::system(system_prompt), Message::user(retry_prompt)])
        .await
        .map_err(AgentError::Llm)?;
    match parse_output(&output)? {
        DecomposeOutcome::Clarify(q) => Ok(DecomposeOutcome::Clarify(q)),
        DecomposeOutcome::Nodes(retried) if !retried.is_empty() => {
            Ok(DecomposeOutcome::Nodes(constrain(retried, max, level_name)))
        }
        DecomposeOutcome::Nodes(_) => Err(AgentError::Planning(format!(
            "{} decomposition produced no nodes after retry",
            level_name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n[1, 2]\n```").as_deref(), Some("[1, 2]"));
        assert_eq!(extract_json("here: [1, 2] done").as_deref(), Some("[1, 2]"));
        assert_eq!(extract_json("{\"a\": 1}").as_deref(), Some("{\"a\": 1}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_clarify_object() {
        let outcome = parse_output("{\"clarify\": \"which folder?\"}").unwrap();
        assert!(matches!(outcome, DecomposeOutcome::Clarify(q) if q == "which folder?"));
    }

    #[test]
    fn test_constrain_merges_overflow_and_cleans_deps() {
        let nodes: Vec<DraftNode> = serde_json::from_str(
            r#"[
                {"title": "a"},
                {"title": "b", "depends_on": [0, 5]},
                {"title": "c"},
                {"title": "d"}
            ]"#,
        )
        .unwrap();
        let out = constrain(nodes, 3, "phase");
        assert_eq!(out.len(), 3);
        assert!(out[2].description.contains("d"));
        assert_eq!(out[1].depends_on, vec![0]);
    }

    #[tokio::test]
    async fn test_decompose_retries_when_too_few() {
        let llm = ScriptedLlm::new(vec![
            "[{\"title\": \"only one\"}]".to_string(),
            "[{\"title\": \"a\"}, {\"title\": \"b\"}, {\"title\": \"c\"}]".to_string(),
        ]);
        let outcome = decompose(&llm, "sys", "user", 3, 5, "phase").await.unwrap();
        match outcome {
            DecomposeOutcome::Nodes(nodes) => assert_eq!(nodes.len(), 3),
            _ => panic!("expected nodes"),
        }
        assert_eq!(llm.remaining(), 0);
    }

    #[tokio::test]
    async fn test_decompose_empty_output_fails_without_retry() {
        let llm = ScriptedLlm::new(vec![
            "[]".to_string(),
            "[{\"title\": \"a\"}, {\"title\": \"b\"}, {\"title\": \"c\"}]".to_string(),
        ]);
        let err = decompose(&llm, "sys", "user", 3, 5, "phase").await.unwrap_err();
        assert!(matches!(err, AgentError::Planning(_)));
        // 第二条脚本未被消费：空输出没有走本地重试
        assert_eq!(llm.remaining(), 1);
    }
}
