//! Agent 错误类型
//!
//! 与 ErrorRecoveryEngine 配合：按错误分类（ToolNotFound / InvalidArguments /
//! EnvironmentChanged / TransientFailure / Unknown）决定恢复动作；
//! PolicyDenied 永不重试，GoalUnachieved 表示所有策略耗尽。

use thiserror::Error;

/// 目标执行过程中可能出现的错误（规划、工具、策略、安全、记忆等）
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// 分解失败或输出畸形；对该节点致命，向上传播触发重新选择策略
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// 环境状态已变化（界面/文件等），需要重生成失败的 Step
    #[error("Environment changed: {0}")]
    EnvironmentChanged(String),

    /// 安全监视器拒绝；对 Step 致命，永不重试
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 工具返回的失败，消息由恢复引擎进一步分类
    #[error("Tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// 所有策略耗尽后的目标级失败
    #[error("Goal unachieved after {attempts} strategy attempts")]
    GoalUnachieved { attempts: usize },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 是否为对 Step 致命、不进入恢复流程的错误
    pub fn is_fatal_for_step(&self) -> bool {
        matches!(self, AgentError::PolicyDenied(_) | AgentError::Cancelled)
    }
}
