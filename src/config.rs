//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ANT__*` 覆盖（双下划线表示嵌套，如 `ANT__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub execution: ExecutionSection,
    pub security: SecuritySection,
    pub memory: MemorySection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、策略尝试上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 单个目标允许的策略尝试次数上限
    #[serde(default = "default_max_strategy_attempts")]
    pub max_strategy_attempts: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_strategy_attempts: default_max_strategy_attempts(),
        }
    }
}

fn default_max_strategy_attempts() -> usize {
    4
}

/// [llm] 段：后端选择与生成参数
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai 兼容端点；无 API Key 时回退 Mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 嵌入模型（记忆检索）
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// 规划温度：低方差生成，接近可复现
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

/// [execution] 段：重试上限、退避与各类工具超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    /// 单 Step 执行次数上限（含首次）
    #[serde(default = "default_step_retry_limit")]
    pub step_retry_limit: u32,
    /// 单 Task 整体重试上限（重生成 Steps）
    #[serde(default = "default_task_retry_limit")]
    pub task_retry_limit: u32,
    /// 瞬时失败指数退避基数（毫秒）
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// 本地 I/O 类工具超时（秒）
    #[serde(default = "default_local_timeout_secs")]
    pub local_timeout_secs: u64,
    /// 网络类工具超时（秒）
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    /// 模型类工具超时（秒）
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            step_retry_limit: default_step_retry_limit(),
            task_retry_limit: default_task_retry_limit(),
            backoff_base_ms: default_backoff_base_ms(),
            local_timeout_secs: default_local_timeout_secs(),
            network_timeout_secs: default_network_timeout_secs(),
            model_timeout_secs: default_model_timeout_secs(),
        }
    }
}

fn default_step_retry_limit() -> u32 {
    3
}

fn default_task_retry_limit() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_local_timeout_secs() -> u64 {
    10
}

fn default_network_timeout_secs() -> u64 {
    30
}

fn default_model_timeout_secs() -> u64 {
    60
}

/// [security] 段：拒绝的工具名、参数正则与监视器超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    #[serde(default)]
    pub denied_tools: Vec<String>,
    /// 对序列化参数做正则匹配，命中即 Deny
    #[serde(default = "default_denied_patterns")]
    pub denied_patterns: Vec<String>,
    /// 监视器应答超时（毫秒）；超时按 Deny 处理（fail-closed）
    #[serde(default = "default_monitor_timeout_ms")]
    pub monitor_timeout_ms: u64,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            denied_tools: Vec::new(),
            denied_patterns: default_denied_patterns(),
            monitor_timeout_ms: default_monitor_timeout_ms(),
        }
    }
}

fn default_denied_patterns() -> Vec<String> {
    vec![
        r"rm\s+-rf\s+/".to_string(),
        r"(?i)password|credential|secret_key".to_string(),
    ]
}

fn default_monitor_timeout_ms() -> u64 {
    500
}

/// [memory] 段：检索条数、容量与可选 SQLite 路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 规划前召回的相关记录条数
    #[serde(default = "default_recall_top_k")]
    pub recall_top_k: usize,
    /// 内存实现的最大记录数，超出时淘汰最旧
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// 设置后改用 SQLite 持久化存储
    pub sqlite_path: Option<PathBuf>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            recall_top_k: default_recall_top_k(),
            max_records: default_max_records(),
            sqlite_path: None,
        }
    }
}

fn default_recall_top_k() -> usize {
    5
}

fn default_max_records() -> usize {
    1000
}

/// [tools] 段：内建工具参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// fetch 工具允许的域名白名单；为空时不注册 fetch
    #[serde(default)]
    pub fetch_allowed_domains: Vec<String>,
    /// fetch 返回内容的最大字符数，超出截断
    #[serde(default = "default_fetch_max_result_chars")]
    pub fetch_max_result_chars: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            fetch_allowed_domains: Vec::new(),
            fetch_max_result_chars: default_fetch_max_result_chars(),
        }
    }
}

fn default_fetch_max_result_chars() -> usize {
    20_000
}

/// 从 config 目录加载配置，环境变量 ANT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 则追加该文件，缺失或格式非法直接报错（可覆盖前面的键）
/// 3. 最后叠加环境变量 ANT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    // 显式指定的配置文件不允许静默忽略
    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ANT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（配置热更新：调用方决定是否用新配置重建组件）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_strategy_attempts, 4);
        assert_eq!(cfg.execution.step_retry_limit, 3);
        assert_eq!(cfg.execution.task_retry_limit, 2);
        assert_eq!(cfg.execution.backoff_base_ms, 200);
        assert_eq!(cfg.security.monitor_timeout_ms, 500);
        assert_eq!(cfg.memory.recall_top_k, 5);
    }

    #[test]
    fn test_load_without_files() {
        let cfg = load_config(None).unwrap_or_default();
        assert!(cfg.execution.step_retry_limit >= 1);
    }

    #[test]
    fn test_explicit_config_file_errors_surface() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[execution\nstep_retry_limit = ").unwrap();
        assert!(load_config(Some(path)).is_err());
        assert!(load_config(Some(dir.path().join("absent.toml"))).is_err());
    }
}
