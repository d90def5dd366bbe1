//! 战术层规划：阶段 -> 具体任务，依赖只指向更早的兄弟

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::plan::{NodeId, Plan, PlanNode};
use crate::planner::decompose::{decompose, DecomposeOutcome, PlanContext};

const SYSTEM_PROMPT: &str =
    "You break a strategic phase into executable tasks. Respond only with JSON.";

const MAX_TASKS: usize = 8;

pub struct TacticalPlanner {
    llm: Arc<dyn LlmClient>,
}

impl TacticalPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 把一个阶段分解为任务并挂入计划树；depends_on 下标映射为兄弟任务 id
    pub async fn plan_phase(
        &self,
        plan: &mut Plan,
        phase_id: &NodeId,
        ctx: &PlanContext,
    ) -> Result<(), AgentError> {
        let phase = plan
            .node(phase_id)
            .ok_or_else(|| AgentError::Planning(format!("unknown phase node: {}", phase_id)))?;

        let mut prompt = format!(
            "Goal: {}\nCurrent phase: {} - {}\nApproach: {}\n",
            ctx.goal_text,
            phase.title,
            phase.description,
            ctx.strategy.planning_hint()
        );
        let context = ctx.render_context();
        if !context.is_empty() {
            prompt.push_str(&context);
        }
        prompt.push_str(
            "Break this phase into concrete tasks (at most 8). A task may depend on earlier tasks \
             in the same list via zero-based indices.\n\
             Respond with a JSON array: [{\"title\": \"...\", \"description\": \"...\", \"depends_on\": [0]}, ...]",
        );

        let drafts = match decompose(self.llm.as_ref(), SYSTEM_PROMPT, &prompt, 1, MAX_TASKS, "task").await? {
            DecomposeOutcome::Nodes(drafts) => drafts,
            DecomposeOutcome::Clarify(question) => {
                // 澄清只在战略层有效
                return Err(AgentError::Planning(format!(
                    "clarification requested during task planning: {}",
                    question
                )));
            }
        };

        let mut sibling_ids: Vec<NodeId> = Vec::new();
        for draft in drafts {
            let deps: Vec<NodeId> = draft
                .depends_on
                .iter()
                .filter_map(|&idx| sibling_ids.get(idx).cloned())
                .collect();
            let node = PlanNode::task(draft.title, draft.description).with_dependencies(deps);
            if let Some(id) = plan.add_child(phase_id, node) {
                sibling_ids.push(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::plan::Strategy;

    #[tokio::test]
    async fn test_dependency_indices_map_to_sibling_ids() {
        let llm = Arc::new(ScriptedLlm::new(vec![r#"[
            {"title": "collect", "description": "collect input"},
            {"title": "process", "description": "process it", "depends_on": [0]}
        ]"#
        .to_string()]));
        let planner = TacticalPlanner::new(llm);
        let mut plan = Plan::new(Strategy::DirectCapability);
        let phase = plan.add_phase(PlanNode::phase("p", "phase"));
        let ctx = PlanContext::new(Strategy::DirectCapability, "goal");
        planner.plan_phase(&mut plan, &phase, &ctx).await.unwrap();

        let tasks = plan.children_of(&phase).to_vec();
        assert_eq!(tasks.len(), 2);
        let second = plan.node(&tasks[1]).unwrap();
        assert_eq!(second.depends_on, vec![tasks[0].clone()]);
    }
}
