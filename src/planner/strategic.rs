//! 战略层规划：目标 -> 3-5 个有序阶段
//!
//! 目标含糊时允许 LLM 以 {"clarify": "..."} 替代分解，上浮为
//! NEEDS_CLARIFICATION，不消耗策略尝试。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::plan::{Goal, Plan, PlanNode};
use crate::planner::decompose::{decompose, DecomposeOutcome, PlanContext};

const SYSTEM_PROMPT: &str =
    "You decompose a user goal into ordered strategic phases. Respond only with JSON.";

/// 战略规划结果：阶段骨架，或待用户回答的问题
pub enum StrategicOutcome {
    Plan(Plan),
    Clarify(String),
}

pub struct StrategicPlanner {
    llm: Arc<dyn LlmClient>,
}

impl StrategicPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 按当前策略把目标分解为阶段骨架（只有 Phase 层，Task/Step 由下层填充）
    pub async fn plan(&self, goal: &Goal, ctx: &PlanContext) -> Result<StrategicOutcome, AgentError> {
        let mut prompt = format!(
            "Goal: {}\nApproach: {}\n",
            goal.context_text(),
            ctx.strategy.planning_hint()
        );
        let context = ctx.render_context();
        if !context.is_empty() {
            prompt.push_str(&context);
        }
        prompt.push_str(
            "Decompose the goal into 3-5 ordered strategic phases.\n\
             If the goal is too ambiguous to plan, respond with {\"clarify\": \"one question for the user\"}.\n\
             Otherwise respond with a JSON array: [{\"title\": \"...\", \"description\": \"...\"}, ...]",
        );

        match decompose(self.llm.as_ref(), SYSTEM_PROMPT, &prompt, 3, 5, "phase").await? {
            DecomposeOutcome::Clarify(question) => Ok(StrategicOutcome::Clarify(question)),
            DecomposeOutcome::Nodes(drafts) => {
                let mut plan = Plan::new(ctx.strategy);
                for draft in drafts {
                    plan.add_phase(PlanNode::phase(draft.title, draft.description));
                }
                Ok(StrategicOutcome::Plan(plan))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::plan::Strategy;

    #[tokio::test]
    async fn test_mock_goal_becomes_three_phases() {
        let planner = StrategicPlanner::new(Arc::new(MockLlmClient));
        let goal = Goal::new("find matching orders");
        let ctx = PlanContext::new(Strategy::DirectCapability, goal.context_text());
        match planner.plan(&goal, &ctx).await.unwrap() {
            StrategicOutcome::Plan(plan) => assert_eq!(plan.roots.len(), 3),
            _ => panic!("expected a plan"),
        }
    }

    #[tokio::test]
    async fn test_ambiguous_goal_surfaces_question() {
        let llm = Arc::new(crate::llm::ScriptedLlm::new(vec![
            "{\"clarify\": \"which account do you mean?\"}".to_string(),
        ]));
        let planner = StrategicPlanner::new(llm);
        let goal = Goal::new("handle the account");
        let ctx = PlanContext::new(Strategy::DirectCapability, goal.context_text());
        match planner.plan(&goal, &ctx).await.unwrap() {
            StrategicOutcome::Clarify(q) => assert!(q.contains("account")),
            _ => panic!("expected a clarification"),
        }
    }
}
