//! 工具合成：缺失能力的运行时补齐
//!
//! ToolNotFound 恢复路径：ToolSynthesizer 依据 Step 意图产出 ToolBlueprint
//! （名称、描述、参数 schema），不生成、不加载任何代码；蓝图包装为委托 LLM
//! 执行的 SynthesizedTool，经 ToolRegistry::register_validated 校验后准入。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::llm::{LlmClient, Message};
use crate::planner::decompose::extract_json;
use crate::tools::{Tool, ToolKind};

/// 合成工具蓝图：描述符三元组，准入前校验
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBlueprint {
    pub name: String,
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
}

fn default_parameters() -> Value {
    json!({"type": "object", "properties": {}, "required": []})
}

/// 工具合成协作方：从 Step 意图产出蓝图
#[async_trait]
pub trait ToolSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        intent: &str,
        missing_tool: &str,
        available_tools: &[String],
    ) -> Result<ToolBlueprint, String>;
}

/// LLM 驱动的蓝图合成
pub struct LlmToolSynthesizer {
    llm: Arc<dyn LlmClient>,
}

impl LlmToolSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ToolSynthesizer for LlmToolSynthesizer {
    async fn synthesize(
        &self,
        intent: &str,
        missing_tool: &str,
        available_tools: &[String],
    ) -> Result<ToolBlueprint, String> {
        let prompt = format!(
            "A step needs a capability that does not exist yet.\n\
             Step intent: {}\n\
             Missing tool name hint: {}\n\
             Existing tools (do not reuse these names): {}\n\
             Design a new tool for this intent. Respond with exactly one JSON object:\n\
             {{\"name\": \"snake_case_name\", \"description\": \"what it does and its args\", \
             \"parameters\": {{\"type\": \"object\", \"properties\": {{...}}, \"required\": [...]}}}}",
            intent,
            missing_tool,
            available_tools.join(", ")
        );
        let output = self
            .llm
            .complete(&[
                Message::system("You design tool capability descriptors."),
                Message::user(prompt),
            ])
            .await?;

        let json_str = extract_json(&output).ok_or_else(|| "no JSON in synthesis output".to_string())?;
        let blueprint: ToolBlueprint =
            serde_json::from_str(&json_str).map_err(|e| format!("blueprint parse error: {}", e))?;
        Ok(blueprint)
    }
}

/// 蓝图包装成的可执行工具：调用时委托 LLM 按描述与参数产出 JSON 结果
pub struct SynthesizedTool {
    blueprint: ToolBlueprint,
    llm: Arc<dyn LlmClient>,
}

impl SynthesizedTool {
    pub fn new(blueprint: ToolBlueprint, llm: Arc<dyn LlmClient>) -> Self {
        Self { blueprint, llm }
    }
}

#[async_trait]
impl Tool for SynthesizedTool {
    fn name(&self) -> &str {
        &self.blueprint.name
    }

    fn description(&self) -> &str {
        &self.blueprint.description
    }

    fn parameters_schema(&self) -> Value {
        self.blueprint.parameters.clone()
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Model
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let prompt = format!(
            "You are the tool '{}': {}\nArguments: {}\n\
             Perform the tool's function and respond with exactly one JSON object describing the result.",
            self.blueprint.name, self.blueprint.description, args
        );
        let output = self
            .llm
            .complete(&[Message::user(prompt)])
            .await?;

        match extract_json(&output).and_then(|s| serde_json::from_str::<Value>(&s).ok()) {
            Some(v) if v.is_object() => Ok(v),
            _ => Ok(json!({"result": output, "success": true})),
        }
    }
}
