//! 工具执行器
//!
//! 持有 ToolRegistry 与按类别分档的超时；派发前按 schema 校验必填参数，
//! 超时按瞬时失败处理（ToolTimeout），工具返回 Err 则转为 ToolFailed 交恢复引擎
//! 分类；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolKind, ToolRegistry};

/// 各类别超时档位
#[derive(Debug, Clone, Copy)]
pub struct ToolTimeouts {
    pub local: Duration,
    pub network: Duration,
    pub model: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            local: Duration::from_secs(10),
            network: Duration::from_secs(30),
            model: Duration::from_secs(60),
        }
    }
}

impl ToolTimeouts {
    pub fn for_kind(&self, kind: ToolKind) -> Duration {
        match kind {
            ToolKind::Local => self.local,
            ToolKind::Network => self.network,
            ToolKind::Model => self.model,
        }
    }
}

/// 工具执行器：查找 -> 参数校验 -> 限时执行 -> 错误映射 + 审计日志
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeouts: ToolTimeouts,
}

/// 按 schema 的 required 列表校验参数对象
fn validate_args(tool_name: &str, schema: &Value, args: &Value) -> Result<(), AgentError> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    if required.is_empty() {
        return Ok(());
    }
    let Some(obj) = args.as_object() else {
        return Err(AgentError::InvalidArguments {
            tool: tool_name.to_string(),
            reason: "arguments must be a JSON object".to_string(),
        });
    };
    for key in required.iter().filter_map(|k| k.as_str()) {
        if !obj.contains_key(key) {
            return Err(AgentError::InvalidArguments {
                tool: tool_name.to_string(),
                reason: format!("missing required argument '{}'", key),
            });
        }
    }
    Ok(())
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeouts: ToolTimeouts) -> Self {
        Self { registry, timeouts }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行指定工具；超时返回 ToolTimeout，工具 Err 转为 ToolFailed；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<Value, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::ToolNotFound(tool_name.to_string()))?;

        validate_args(tool_name, &tool.parameters_schema(), &args)?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let limit = self.timeouts.for_kind(tool.kind());
        let result = timeout(limit, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(message)) => Err(AgentError::ToolFailed {
                tool: tool_name.to_string(),
                message,
            }),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps longer than the local timeout"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    struct StrictTool;

    #[async_trait]
    impl Tool for StrictTool {
        fn name(&self) -> &str {
            "strict"
        }
        fn description(&self) -> &str {
            "requires a 'path' argument"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            })
        }
        async fn execute(&self, args: Value) -> Result<Value, String> {
            Ok(json!({"path": args["path"]}))
        }
    }

    fn executor_with(tool: impl Tool + 'static) -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(tool);
        ToolExecutor::new(
            registry,
            ToolTimeouts {
                local: Duration::from_millis(50),
                network: Duration::from_millis(50),
                model: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let executor = executor_with(StrictTool);
        let err = executor.execute("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let executor = executor_with(StrictTool);
        let err = executor.execute("strict", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_timeout() {
        let executor = executor_with(SlowTool);
        let err = executor.execute("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn test_valid_call_returns_payload() {
        let executor = executor_with(StrictTool);
        let out = executor
            .execute("strict", json!({"path": "/tmp/a"}))
            .await
            .unwrap();
        assert_eq!(out["path"], "/tmp/a");
    }
}
