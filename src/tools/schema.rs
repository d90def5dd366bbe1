//! Step 调用 JSON Schema 生成（schemars）
//!
//! 将「合法 Step」的 JSON 结构注入操作层规划提示，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// Step 格式：与操作层分解的 `{"title", "description", "tool", "args"}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct StepCallFormat {
    /// 步骤短标题
    pub title: String,
    /// 步骤意图描述
    pub description: String,
    /// 工具名，必须来自 Available tools
    pub tool: String,
    /// 工具参数，依工具 schema 而定
    pub args: HashMap<String, String>,
}

/// 返回 Step 调用的 JSON Schema 字符串，可拼入规划提示
pub fn step_call_schema_json() -> String {
    let schema = schema_for!(StepCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_tool_field() {
        let s = step_call_schema_json();
        assert!(s.contains("tool"));
        assert!(s.contains("args"));
    }
}
