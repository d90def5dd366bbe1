//! 操作层规划：任务 -> 工具调用步骤
//!
//! 提示内注入注册表中全部工具的 schema 与合法 Step 的 JSON Schema；
//! 步骤引用的工具不在注册表时保留工具名但置 tool_missing，交恢复引擎在
//! 执行前合成补齐。步骤在任务内严格顺序执行，不声明依赖。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::plan::{NodeId, Plan, PlanNode};
use crate::planner::decompose::{decompose, DecomposeOutcome, PlanContext};
use crate::tools::{step_call_schema_json, ToolRegistry};

const SYSTEM_PROMPT: &str =
    "You turn a task into a short sequence of tool invocations. Respond only with JSON.";

const MAX_STEPS: usize = 10;

pub struct OperationalPlanner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
}

impl OperationalPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>) -> Self {
        Self { llm, registry }
    }

    /// 把一个任务分解为步骤并挂入计划树
    pub async fn plan_task(
        &self,
        plan: &mut Plan,
        task_id: &NodeId,
        ctx: &PlanContext,
    ) -> Result<(), AgentError> {
        let task = plan
            .node(task_id)
            .ok_or_else(|| AgentError::Planning(format!("unknown task node: {}", task_id)))?;

        let mut prompt = format!(
            "Goal: {}\nCurrent task: {} - {}\nApproach: {}\n",
            ctx.goal_text,
            task.title,
            task.description,
            ctx.strategy.planning_hint()
        );
        if let Some(note) = &task.failure_note {
            prompt.push_str(&format!("The previous attempt at this task failed: {}\n", note));
        }
        let context = ctx.render_context();
        if !context.is_empty() {
            prompt.push_str(&context);
        }
        prompt.push_str(&format!(
            "Available tools:\n{}\n\
             Each step must follow this schema:\n{}\n\
             Produce the tool invocation steps for this task, in execution order (at most 10).\n\
             Prefer the available tools; if none fits, name the capability the step needs in \"tool\".\n\
             Respond with a JSON array of steps.",
            self.registry.to_schema_json(),
            step_call_schema_json()
        ));

        let drafts = match decompose(self.llm.as_ref(), SYSTEM_PROMPT, &prompt, 1, MAX_STEPS, "step").await? {
            DecomposeOutcome::Nodes(drafts) => drafts,
            DecomposeOutcome::Clarify(question) => {
                return Err(AgentError::Planning(format!(
                    "clarification requested during step planning: {}",
                    question
                )));
            }
        };

        for draft in drafts {
            let mut node = PlanNode::step(draft.title, draft.description, draft.tool, draft.args);
            if let Some(tool) = &node.tool {
                if !self.registry.contains(tool) {
                    node.tool_missing = true;
                }
            }
            plan.add_child(task_id, node);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::plan::Strategy;
    use crate::tools::EchoTool;

    fn registry_with_echo() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool);
        registry
    }

    #[tokio::test]
    async fn test_unknown_tool_flags_tool_missing() {
        let llm = Arc::new(ScriptedLlm::new(vec![r#"[
            {"title": "echo", "description": "say hi", "tool": "echo", "args": {"text": "hi"}},
            {"title": "scan", "description": "scan inbox", "tool": "scan_inbox", "args": {}}
        ]"#
        .to_string()]));
        let planner = OperationalPlanner::new(llm, registry_with_echo());
        let mut plan = Plan::new(Strategy::DirectCapability);
        let phase = plan.add_phase(PlanNode::phase("p", ""));
        let task = plan.add_child(&phase, PlanNode::task("t", "")).unwrap();
        let ctx = PlanContext::new(Strategy::DirectCapability, "goal");
        planner.plan_task(&mut plan, &task, &ctx).await.unwrap();

        let steps = plan.children_of(&task).to_vec();
        assert_eq!(steps.len(), 2);
        assert!(!plan.node(&steps[0]).unwrap().tool_missing);
        assert!(plan.node(&steps[1]).unwrap().tool_missing);
        assert_eq!(plan.node(&steps[1]).unwrap().tool.as_deref(), Some("scan_inbox"));
    }
}
