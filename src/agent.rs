//! Agent 装配
//!
//! 按 AppConfig 组装全部组件：LLM 客户端与嵌入、工具注册表（echo / fetch）、
//! 记忆库（内存或 SQLite）、安全监察、执行协调器与策略选择器。
//! 有 OPENAI_API_KEY 且 provider 非 mock 时走 OpenAI 兼容端点，否则回退
//! Mock + 哈希嵌入（离线可跑通全流程）。

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::core::{ExecutionCoordinator, RecoveryEngine, StrategySelector, Supervisor};
use crate::llm::{EmbeddingProvider, HashEmbedder, LlmClient, MockLlmClient, OpenAiClient, OpenAiEmbedder};
use crate::memory::{InMemoryStore, MemoryStore, SqliteStore};
use crate::plan::{Goal, GoalResult};
use crate::planner::{OperationalPlanner, StrategicPlanner, TacticalPlanner};
use crate::security::SecurityMonitor;
use crate::tools::{
    EchoTool, FetchTool, Tool, ToolDescriptor, ToolExecutor, ToolRegistry, ToolTimeouts,
};
use crate::core::AgentError;

/// 自主目标执行引擎的对外入口
pub struct Agent {
    config: AppConfig,
    registry: Arc<ToolRegistry>,
    supervisor: Supervisor,
    selector: StrategySelector,
}

impl Agent {
    /// 按配置装配；需在 tokio 运行时内调用（安全监察任务在此启动）
    pub fn from_config(config: AppConfig) -> Result<Self, AgentError> {
        let use_openai = config.llm.provider != "mock" && std::env::var("OPENAI_API_KEY").is_ok();
        let (llm, embedder): (Arc<dyn LlmClient>, Arc<dyn EmbeddingProvider>) = if use_openai {
            info!(model = %config.llm.model, "使用 OpenAI 兼容后端");
            (
                Arc::new(OpenAiClient::new(
                    config.llm.base_url.as_deref(),
                    &config.llm.model,
                    None,
                    config.llm.temperature,
                )),
                Arc::new(OpenAiEmbedder::new(
                    config.llm.base_url.as_deref(),
                    &config.llm.embedding_model,
                    None,
                )),
            )
        } else {
            info!("无可用 API Key，回退 Mock LLM 与哈希嵌入");
            (Arc::new(MockLlmClient), Arc::new(HashEmbedder))
        };
        Self::with_llm(config, llm, embedder)
    }

    /// 注入 LLM 与嵌入后端装配（测试或自定义后端）
    pub fn with_llm(
        config: AppConfig,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, AgentError> {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool);
        if !config.tools.fetch_allowed_domains.is_empty() {
            registry.register(FetchTool::new(
                config.tools.fetch_allowed_domains.clone(),
                config.execution.network_timeout_secs,
                config.tools.fetch_max_result_chars,
            ));
        }

        let memory: Arc<dyn MemoryStore> = match &config.memory.sqlite_path {
            Some(path) => Arc::new(SqliteStore::open(path, embedder.clone(), config.memory.max_records)?),
            None => Arc::new(InMemoryStore::new(embedder.clone(), config.memory.max_records)),
        };

        let supervisor = Supervisor::new();
        let timeouts = ToolTimeouts {
            local: Duration::from_secs(config.execution.local_timeout_secs),
            network: Duration::from_secs(config.execution.network_timeout_secs),
            model: Duration::from_secs(config.execution.model_timeout_secs),
        };
        let executor = Arc::new(ToolExecutor::new(registry.clone(), timeouts));
        let recovery = Arc::new(RecoveryEngine::new(
            llm.clone(),
            registry.clone(),
            Duration::from_millis(config.execution.backoff_base_ms),
        ));
        let operational = Arc::new(OperationalPlanner::new(llm.clone(), registry.clone()));
        let monitor = SecurityMonitor::from_config(&config.security);
        let coordinator = Arc::new(ExecutionCoordinator::new(
            executor,
            registry.clone(),
            recovery,
            operational.clone(),
            monitor,
            supervisor.clone(),
            config.execution.step_retry_limit,
            config.execution.task_retry_limit,
        ));
        let selector = StrategySelector::new(
            StrategicPlanner::new(llm.clone()),
            TacticalPlanner::new(llm),
            operational,
            coordinator,
            memory,
            supervisor.clone(),
            config.memory.recall_top_k,
            config.app.max_strategy_attempts,
        );

        Ok(Self {
            config,
            registry,
            supervisor,
            selector,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 注册宿主提供的工具
    pub fn register_tool(&self, tool: impl Tool + 'static) {
        self.registry.register(tool);
    }

    /// 宿主控制句柄（Pause / Resume / Stop）
    pub fn supervisor(&self) -> Supervisor {
        self.supervisor.clone()
    }

    /// 执行一个目标直到终态
    pub async fn run_goal(&self, goal: &Goal) -> GoalResult {
        info!(goal = %goal.description, "开始执行目标");
        let result = self.selector.run_goal(goal).await;
        info!(status = ?result.status, attempts = result.attempts_used, "目标执行结束");
        result
    }

    /// 工具可靠性报告：按失败数降序（失败最多的排最前）
    pub fn reliability_report(&self) -> Vec<ToolDescriptor> {
        self.registry.reliability_report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CriterionPredicate, GoalStatus};

    #[tokio::test]
    async fn test_agent_runs_goal_offline() {
        let agent = Agent::with_llm(
            AppConfig::default(),
            Arc::new(MockLlmClient),
            Arc::new(HashEmbedder),
        )
        .unwrap();
        let goal = Goal::new("report progress").with_criterion("success", CriterionPredicate::IsTrue);
        let result = agent.run_goal(&goal).await;
        assert_eq!(result.status, GoalStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_reliability_report_orders_by_failures() {
        let agent = Agent::with_llm(
            AppConfig::default(),
            Arc::new(MockLlmClient),
            Arc::new(HashEmbedder),
        )
        .unwrap();
        agent.registry().record_outcome("echo", true);
        let report = agent.reliability_report();
        assert!(report.iter().any(|d| d.name == "echo" && d.successes == 1));
    }
}
