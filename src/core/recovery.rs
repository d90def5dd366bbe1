//! 错误恢复引擎
//!
//! 将 Step 执行错误分类为五类，并给出对应恢复动作：
//!   ToolNotFound       -> 合成蓝图并校验注册，带新工具重试
//!   InvalidArguments   -> LLM 重推参数，仅一次
//!   EnvironmentChanged -> 重生成所属任务中未完成的步骤
//!   Transient          -> 指数退避后重试
//!   Unknown            -> 上报，不在 Step 层处理
//! ToolFailed 携带的工具侧错误消息按关键词进一步归类。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::core::error::AgentError;
use crate::llm::{LlmClient, Message};
use crate::plan::PlanNode;
use crate::planner::decompose::extract_json;
use crate::tools::{LlmToolSynthesizer, SynthesizedTool, ToolRegistry, ToolSynthesizer};

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ToolNotFound,
    InvalidArguments,
    EnvironmentChanged,
    Transient,
    Unknown,
}

/// 恢复动作：协调器按动作决定如何继续
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 合成工具已注册，带该工具名重试
    RetryWithTool(String),
    /// 带修正后的参数重试
    RetryWithArgs(Value),
    /// 环境已变化，重生成所属任务中未完成的步骤
    RegenerateStep,
    /// 退避后原样重试
    RetryAfterBackoff(Duration),
    /// 无法在 Step 层恢复，携带原因上报
    Escalate(String),
}

/// 工具侧错误消息的关键词归类
fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    const TRANSIENT: &[&str] = &[
        "timeout", "timed out", "connection", "rate limit", "temporarily", "503", "502",
    ];
    const ENVIRONMENT: &[&str] = &[
        "changed", "stale", "not visible", "no longer", "moved", "已变化", "不存在了",
    ];
    const ARGUMENTS: &[&str] = &["invalid", "argument", "missing", "参数"];

    if TRANSIENT.iter().any(|k| lower.contains(k)) {
        ErrorClass::Transient
    } else if ENVIRONMENT.iter().any(|k| lower.contains(k)) {
        ErrorClass::EnvironmentChanged
    } else if ARGUMENTS.iter().any(|k| lower.contains(k)) {
        ErrorClass::InvalidArguments
    } else {
        ErrorClass::Unknown
    }
}

pub fn classify(error: &AgentError) -> ErrorClass {
    match error {
        AgentError::ToolNotFound(_) => ErrorClass::ToolNotFound,
        AgentError::InvalidArguments { .. } => ErrorClass::InvalidArguments,
        AgentError::EnvironmentChanged(_) => ErrorClass::EnvironmentChanged,
        AgentError::Transient(_) | AgentError::ToolTimeout(_) => ErrorClass::Transient,
        AgentError::ToolFailed { message, .. } => classify_message(message),
        _ => ErrorClass::Unknown,
    }
}

/// 恢复引擎：持有合成器、注册表与 LLM（参数修正用）
pub struct RecoveryEngine {
    llm: Arc<dyn LlmClient>,
    synthesizer: Arc<dyn ToolSynthesizer>,
    registry: Arc<ToolRegistry>,
    backoff_base: Duration,
}

impl RecoveryEngine {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, backoff_base: Duration) -> Self {
        let synthesizer = Arc::new(LlmToolSynthesizer::new(llm.clone()));
        Self {
            llm,
            synthesizer,
            registry,
            backoff_base,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn ToolSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    /// 指数退避：base * 2^attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }

    /// 针对一次 Step 失败给出恢复动作；attempt 为此前已重试的次数（首轮为 0）
    pub async fn recover(
        &self,
        step: &PlanNode,
        error: &AgentError,
        attempt: u32,
    ) -> RecoveryAction {
        match classify(error) {
            ErrorClass::ToolNotFound => self.recover_missing_tool(step).await,
            ErrorClass::InvalidArguments => self.recover_arguments(step, error).await,
            ErrorClass::EnvironmentChanged => RecoveryAction::RegenerateStep,
            ErrorClass::Transient => RecoveryAction::RetryAfterBackoff(self.backoff(attempt)),
            ErrorClass::Unknown => RecoveryAction::Escalate(error.to_string()),
        }
    }

    /// 缺失工具：合成蓝图 -> 校验注册 -> 带新工具重试
    async fn recover_missing_tool(&self, step: &PlanNode) -> RecoveryAction {
        let missing = step.tool.clone().unwrap_or_else(|| "unnamed_capability".to_string());
        let blueprint = match self
            .synthesizer
            .synthesize(&step.description, &missing, &self.registry.tool_names())
            .await
        {
            Ok(bp) => bp,
            Err(e) => {
                warn!(step = %step.title, error = %e, "工具合成失败");
                return RecoveryAction::Escalate(format!("tool synthesis failed: {}", e));
            }
        };

        let name = blueprint.name.clone();
        let tool = Arc::new(SynthesizedTool::new(blueprint, self.llm.clone()));
        match self.registry.register_validated(tool) {
            Ok(()) => {
                info!(tool = %name, step = %step.title, "合成工具已注册");
                RecoveryAction::RetryWithTool(name)
            }
            Err(rejection) => {
                warn!(tool = %name, reason = %rejection, "合成工具被拒绝");
                RecoveryAction::Escalate(format!("synthesized tool rejected: {}", rejection))
            }
        }
    }

    /// 参数错误：按工具 schema 与错误原因重推一版参数
    async fn recover_arguments(&self, step: &PlanNode, error: &AgentError) -> RecoveryAction {
        let Some(tool_name) = step.tool.as_deref() else {
            return RecoveryAction::Escalate("argument recovery without a tool".to_string());
        };
        let schema = self
            .registry
            .get(tool_name)
            .map(|t| t.parameters_schema())
            .unwrap_or(Value::Null);

        let prompt = format!(
            "A tool call failed because of its arguments.\n\
             Tool: {}\nParameter schema: {}\nOriginal arguments: {}\nError: {}\n\
             Step intent: {}\n\
             Respond with the corrected arguments as a single JSON object.",
            tool_name, schema, step.args, error, step.description
        );
        let output = match self
            .llm
            .complete(&[Message::user(prompt)])
            .await
        {
            Ok(out) => out,
            Err(e) => return RecoveryAction::Escalate(format!("argument correction failed: {}", e)),
        };

        match extract_json(&output).and_then(|s| serde_json::from_str::<Value>(&s).ok()) {
            Some(args) if args.is_object() => RecoveryAction::RetryWithArgs(args),
            _ => RecoveryAction::Escalate("argument correction produced no JSON object".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use serde_json::json;

    #[test]
    fn test_classify_direct_variants() {
        assert_eq!(classify(&AgentError::ToolNotFound("x".into())), ErrorClass::ToolNotFound);
        assert_eq!(
            classify(&AgentError::InvalidArguments {
                tool: "x".into(),
                reason: "r".into()
            }),
            ErrorClass::InvalidArguments
        );
        assert_eq!(
            classify(&AgentError::ToolTimeout("x".into())),
            ErrorClass::Transient
        );
        assert_eq!(classify(&AgentError::Llm("boom".into())), ErrorClass::Unknown);
    }

    #[test]
    fn test_classify_tool_messages() {
        let failed = |message: &str| AgentError::ToolFailed {
            tool: "t".into(),
            message: message.into(),
        };
        assert_eq!(classify(&failed("connection reset by peer")), ErrorClass::Transient);
        assert_eq!(classify(&failed("element is no longer on screen")), ErrorClass::EnvironmentChanged);
        assert_eq!(classify(&failed("invalid value for 'path'")), ErrorClass::InvalidArguments);
        assert_eq!(classify(&failed("segfault")), ErrorClass::Unknown);
    }

    #[test]
    fn test_backoff_doubles() {
        let engine = RecoveryEngine::new(
            Arc::new(ScriptedLlm::default()),
            Arc::new(ToolRegistry::new()),
            Duration::from_millis(200),
        );
        assert_eq!(engine.backoff(0), Duration::from_millis(200));
        assert_eq!(engine.backoff(1), Duration::from_millis(400));
        assert_eq!(engine.backoff(2), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_first_transient_retry_waits_the_base_delay() {
        let engine = RecoveryEngine::new(
            Arc::new(ScriptedLlm::default()),
            Arc::new(ToolRegistry::new()),
            Duration::from_millis(200),
        );
        let step = PlanNode::step("fetch", "fetch the page", Some("fetch".into()), json!({}));
        let error = AgentError::ToolFailed {
            tool: "fetch".into(),
            message: "connection reset by peer".into(),
        };
        match engine.recover(&step, &error, 0).await {
            RecoveryAction::RetryAfterBackoff(delay) => {
                assert_eq!(delay, Duration::from_millis(200));
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_tool_synthesized_and_registered() {
        let registry = Arc::new(ToolRegistry::new());
        // 第一条响应：合成蓝图；合成工具执行时才会消费后续脚本
        let llm = Arc::new(ScriptedLlm::new(vec![
            r#"{"name": "scan_inbox", "description": "Scan the inbox", "parameters": {"type": "object", "properties": {}, "required": []}}"#.to_string(),
        ]));
        let engine = RecoveryEngine::new(llm, registry.clone(), Duration::from_millis(1));
        let step = PlanNode::step("scan", "scan the inbox for invoices", Some("scan_inbox".into()), json!({}));

        let action = engine
            .recover(&step, &AgentError::ToolNotFound("scan_inbox".into()), 1)
            .await;
        match action {
            RecoveryAction::RetryWithTool(name) => assert_eq!(name, "scan_inbox"),
            other => panic!("unexpected action: {:?}", other),
        }
        assert!(registry.contains("scan_inbox"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_rederived() {
        let registry = Arc::new(ToolRegistry::new());
        let llm = Arc::new(ScriptedLlm::new(vec![r#"{"path": "/tmp/report.pdf"}"#.to_string()]));
        let engine = RecoveryEngine::new(llm, registry, Duration::from_millis(1));
        let step = PlanNode::step("read", "read the report", Some("read_file".into()), json!({}));
        let error = AgentError::InvalidArguments {
            tool: "read_file".into(),
            reason: "missing required argument 'path'".into(),
        };

        match engine.recover(&step, &error, 1).await {
            RecoveryAction::RetryWithArgs(args) => assert_eq!(args["path"], "/tmp/report.pdf"),
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_environment_change_regenerates() {
        let engine = RecoveryEngine::new(
            Arc::new(ScriptedLlm::default()),
            Arc::new(ToolRegistry::new()),
            Duration::from_millis(1),
        );
        let step = PlanNode::step("click", "click export", Some("click".into()), json!({}));
        let action = engine
            .recover(&step, &AgentError::EnvironmentChanged("dialog closed".into()), 1)
            .await;
        assert!(matches!(action, RecoveryAction::RegenerateStep));
    }
}
