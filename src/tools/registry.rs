//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / kind / execute），
//! ToolRegistry 按名注册与查找，并为每个工具维护成功/失败计数（由协调器在每次
//! 调用后更新，用于可靠性报告）。注册表内部用 RwLock，恢复引擎可在运行时注册
//! 合成工具；register_validated 在准入前校验蓝图，拒绝不合规者。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 工具类别：决定执行超时档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolKind {
    /// 本地 I/O，短超时
    Local,
    /// 网络调用，较长超时
    Network,
    /// 模型调用，最长超时
    Model,
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、类别、异步执行
///
/// 执行契约：成功返回 JSON 载荷（data），失败返回错误字符串（error）。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（Step 的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能与参数）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；派发前据此校验参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Local
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// 成功/失败计数
#[derive(Debug, Default)]
pub struct ToolStats {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl ToolStats {
    pub fn record(&self, ok: bool) {
        if ok {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self) -> (u64, u64) {
        (
            self.successes.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

/// 注册表条目
struct RegisteredTool {
    tool: Arc<dyn Tool>,
    stats: Arc<ToolStats>,
}

/// 工具描述符快照（可靠性报告 / 提示注入）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub successes: u64,
    pub failures: u64,
}

/// 蓝图校验失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlueprintRejection {
    InvalidName(String),
    NameCollision(String),
    InvalidSchema(String),
}

impl std::fmt::Display for BlueprintRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlueprintRejection::InvalidName(name) => write!(f, "invalid tool name: {}", name),
            BlueprintRejection::NameCollision(name) => write!(f, "tool already registered: {}", name),
            BlueprintRejection::InvalidSchema(reason) => write!(f, "invalid parameter schema: {}", reason),
        }
    }
}

/// 工具名规则：小写字母开头，小写字母/数字/下划线，<= 64 字符
fn valid_tool_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// 工具注册表：按名称存储 Arc<dyn Tool> 与计数，内部可变以支持运行时合成注册
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内建工具（信任来源，不做蓝图校验）
    pub fn register(&self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if let Ok(mut tools) = self.tools.write() {
            tools.insert(
                name,
                RegisteredTool {
                    tool: Arc::new(tool),
                    stats: Arc::new(ToolStats::default()),
                },
            );
        }
    }

    /// 合成工具准入：名称合法、无冲突、schema 为 object 才注册。
    /// 运行时生成的能力不加载任何代码，只接受通过校验的蓝图包装。
    pub fn register_validated(&self, tool: Arc<dyn Tool>) -> Result<(), BlueprintRejection> {
        let name = tool.name().to_string();
        if !valid_tool_name(&name) {
            return Err(BlueprintRejection::InvalidName(name));
        }
        let schema = tool.parameters_schema();
        if schema.get("type").and_then(|t| t.as_str()) != Some("object") {
            return Err(BlueprintRejection::InvalidSchema(
                "schema type must be object".to_string(),
            ));
        }
        let mut tools = self
            .tools
            .write()
            .map_err(|_| BlueprintRejection::InvalidSchema("registry lock poisoned".to_string()))?;
        if tools.contains_key(&name) {
            return Err(BlueprintRejection::NameCollision(name));
        }
        tools.insert(
            name,
            RegisteredTool {
                tool,
                stats: Arc::new(ToolStats::default()),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .ok()
            .and_then(|tools| tools.get(name).map(|t| t.tool.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .map(|tools| tools.contains_key(name))
            .unwrap_or(false)
    }

    /// 记录一次调用结果（协调器在每次派发后调用）
    pub fn record_outcome(&self, name: &str, ok: bool) {
        if let Ok(tools) = self.tools.read() {
            if let Some(t) = tools.get(name) {
                t.stats.record(ok);
            }
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools
            .read()
            .map(|tools| tools.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 返回 (name, description) 列表，用于生成提示中的 Available tools 段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools
            .read()
            .map(|tools| {
                tools
                    .iter()
                    .map(|(name, t)| (name.clone(), t.tool.description().to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 描述符快照（含计数），按失败率升序即为可靠性报告
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .map(|tools| {
                tools
                    .iter()
                    .map(|(name, t)| {
                        let (successes, failures) = t.stats.get();
                        ToolDescriptor {
                            name: name.clone(),
                            description: t.tool.description().to_string(),
                            parameters: t.tool.parameters_schema(),
                            successes,
                            failures,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 可靠性报告：描述符按失败次数降序（同失败数按名称）排列
    pub fn reliability_report(&self) -> Vec<ToolDescriptor> {
        let mut report = self.descriptors();
        report.sort_by(|a, b| b.failures.cmp(&a.failures).then(a.name.cmp(&b.name)));
        report
    }

    /// 工具 schema JSON（名称、描述、参数），拼入操作层规划提示
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .descriptors()
            .into_iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "description": d.description,
                    "parameters": d.parameters
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
