//! 自适应策略选择
//!
//! 目标级外环：按目标关键词排出策略顺序，逐个尝试（上限 max_attempts）；
//! 每次失败做规则自诊断，诊断与失败备注注入下一次规划上下文；
//! 未试过的策略存在时绝不重复已失败的策略。目标结束后归档记忆，
//! 归档失败只记日志，不影响结果。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::coordinator::{ExecutionCoordinator, ExecutionReport, ExecutionStatus};
use crate::core::supervisor::Supervisor;
use crate::core::AgentError;
use crate::memory::{MemoryRecord, MemoryStore};
use crate::plan::{
    AttemptOutcome, Diagnosis, ExecutionAttempt, Goal, GoalResult, GoalStatus, Plan, Strategy,
};
use crate::planner::{
    OperationalPlanner, PlanContext, StrategicOutcome, StrategicPlanner, TacticalPlanner,
};

enum BuildOutcome {
    Plan(Plan),
    Clarify(String),
}

pub struct StrategySelector {
    strategic: StrategicPlanner,
    tactical: TacticalPlanner,
    operational: Arc<OperationalPlanner>,
    coordinator: Arc<ExecutionCoordinator>,
    memory: Arc<dyn MemoryStore>,
    supervisor: Supervisor,
    recall_top_k: usize,
    max_attempts: usize,
}

impl StrategySelector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategic: StrategicPlanner,
        tactical: TacticalPlanner,
        operational: Arc<OperationalPlanner>,
        coordinator: Arc<ExecutionCoordinator>,
        memory: Arc<dyn MemoryStore>,
        supervisor: Supervisor,
        recall_top_k: usize,
        max_attempts: usize,
    ) -> Self {
        Self {
            strategic,
            tactical,
            operational,
            coordinator,
            memory,
            supervisor,
            recall_top_k,
            max_attempts: max_attempts.max(1),
        }
    }

    /// 执行一个目标直到成功、澄清、取消或策略耗尽
    pub async fn run_goal(&self, goal: &Goal) -> GoalResult {
        let goal_text = goal.context_text();
        let order = Strategy::ordered_for(&goal_text);
        let memory_lines: Vec<String> = match self.memory.query(&goal_text, self.recall_top_k) {
            Ok(records) => records.iter().map(|r| r.render()).collect(),
            Err(e) => {
                warn!(error = %e, "记忆召回失败，无上下文继续");
                Vec::new()
            }
        };

        let mut tried: Vec<Strategy> = Vec::new();
        let mut history: Vec<ExecutionAttempt> = Vec::new();
        let mut failure_notes: Vec<String> = Vec::new();

        while history.len() < self.max_attempts {
            if self.supervisor.is_stopped() {
                let result = GoalResult::cancelled(history.len(), history);
                self.archive(goal, &result);
                return result;
            }

            let strategy = order
                .iter()
                .copied()
                .find(|s| !tried.contains(s))
                .unwrap_or_else(Strategy::last_resort);
            tried.push(strategy);
            let mut attempt = ExecutionAttempt::new(strategy);
            info!(strategy = %strategy, attempt = history.len() + 1, "开始策略尝试");

            let mut ctx = PlanContext::new(strategy, goal_text.clone());
            ctx.memory_lines = memory_lines.clone();
            ctx.failure_notes = failure_notes.clone();

            let mut plan = match self.build_plan(goal, &ctx).await {
                Ok(BuildOutcome::Plan(plan)) => plan,
                Ok(BuildOutcome::Clarify(question)) => {
                    // 澄清不算一次策略尝试
                    info!(question = %question, "目标含糊，等待用户澄清");
                    return GoalResult::needs_clarification(question, history.len(), history);
                }
                Err(e) => {
                    let diagnosis = Diagnosis::new("planning failed").with_error(e.to_string());
                    failure_notes.push(format!("planning failed with {}: {}", strategy, e));
                    attempt.close(AttemptOutcome::Failed, Some(diagnosis));
                    history.push(attempt);
                    continue;
                }
            };

            let report = loop {
                let r = self.coordinator.run(&mut plan, &ctx).await;
                if r.status != ExecutionStatus::Paused {
                    break r;
                }
                // 暂停期间等待 Resume 或 Stop，再从断点继续
                while self.supervisor.is_paused() && !self.supervisor.is_stopped() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            };

            match report.status {
                ExecutionStatus::Cancelled => {
                    attempt.close(AttemptOutcome::Cancelled, None);
                    history.push(attempt);
                    let result = GoalResult::cancelled(history.len(), history);
                    self.archive(goal, &result);
                    return result;
                }
                ExecutionStatus::Completed => {
                    let unmet = goal.unmet_criteria(&report.payload);
                    if unmet.is_empty() {
                        attempt.close(AttemptOutcome::Succeeded, None);
                        history.push(attempt);
                        let result = GoalResult::succeeded(
                            format!("goal achieved with strategy {}", strategy),
                            report.payload,
                            history.len(),
                            strategy,
                            history,
                        );
                        self.archive(goal, &result);
                        return result;
                    }
                    let diagnosis = diagnose(&unmet, &report);
                    failure_notes.push(format!("strategy {}: {}", strategy, diagnosis.summary));
                    attempt.close(AttemptOutcome::Failed, Some(diagnosis));
                    history.push(attempt);
                }
                ExecutionStatus::Failed | ExecutionStatus::Paused => {
                    let detail = report
                        .notes
                        .last()
                        .cloned()
                        .unwrap_or_else(|| "execution failed".to_string());
                    let diagnosis =
                        Diagnosis::new(format!("execution errored: {}", detail)).with_error(detail.clone());
                    failure_notes.push(format!("strategy {}: {}", strategy, detail));
                    attempt.close(AttemptOutcome::Failed, Some(diagnosis));
                    history.push(attempt);
                }
            }
        }

        let attempts = history.len();
        let result = GoalResult::failed(
            AgentError::GoalUnachieved { attempts }.to_string(),
            attempts,
            history,
        );
        self.archive(goal, &result);
        result
    }

    /// 三层规划出完整计划树；战略层可用澄清问题替代分解
    async fn build_plan(&self, goal: &Goal, ctx: &PlanContext) -> Result<BuildOutcome, AgentError> {
        let mut plan = match self.strategic.plan(goal, ctx).await? {
            StrategicOutcome::Clarify(question) => return Ok(BuildOutcome::Clarify(question)),
            StrategicOutcome::Plan(plan) => plan,
        };
        for phase_id in plan.roots.clone() {
            self.tactical.plan_phase(&mut plan, &phase_id, ctx).await?;
        }
        for phase_id in plan.roots.clone() {
            for task_id in plan.children_of(&phase_id).to_vec() {
                self.operational.plan_task(&mut plan, &task_id, ctx).await?;
            }
        }
        Ok(BuildOutcome::Plan(plan))
    }

    fn archive(&self, goal: &Goal, result: &GoalResult) {
        let outcome = match result.status {
            GoalStatus::Succeeded => "succeeded",
            GoalStatus::Failed => "failed",
            GoalStatus::NeedsClarification => "needs_clarification",
            GoalStatus::Cancelled => "cancelled",
        };
        let feedback = match result.final_strategy {
            Some(strategy) => format!("{} via {}", result.summary, strategy),
            None => result.summary.clone(),
        };
        let record = MemoryRecord::new(goal.context_text(), outcome, feedback);
        if let Err(e) = self.memory.store(record) {
            warn!(error = %e, "记忆归档失败");
        }
    }
}

/// 规则自诊断：空载荷或 found=false 视为「查无匹配」，否则报未满足的判据
fn diagnose(unmet: &[String], report: &ExecutionReport) -> Diagnosis {
    let payload_empty = report
        .payload
        .as_object()
        .map(|o| o.is_empty())
        .unwrap_or(true);
    let found_false = report.payload.get("found").and_then(|v| v.as_bool()) == Some(false);
    let summary = if payload_empty || found_false {
        "no matching records found; the approach may be querying the wrong source".to_string()
    } else {
        format!("execution completed but criteria unmet: {}", unmet.join(", "))
    };
    Diagnosis::new(summary).with_unmet(unmet.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recovery::RecoveryEngine;
    use crate::llm::{LlmClient, MockLlmClient, ScriptedLlm};
    use crate::memory::InMemoryStore;
    use crate::plan::CriterionPredicate;
    use crate::security::{RulePolicy, SecurityMonitor};
    use crate::tools::{EchoTool, ToolExecutor, ToolRegistry, ToolTimeouts};
    use serde_json::json;

    fn selector(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>) -> StrategySelector {
        let supervisor = Supervisor::new();
        let executor = Arc::new(ToolExecutor::new(registry.clone(), ToolTimeouts::default()));
        let recovery = Arc::new(RecoveryEngine::new(
            llm.clone(),
            registry.clone(),
            Duration::from_millis(1),
        ));
        let operational = Arc::new(OperationalPlanner::new(llm.clone(), registry.clone()));
        let monitor = SecurityMonitor::spawn(
            Box::new(RulePolicy::new(vec![], vec![])),
            Duration::from_millis(500),
        );
        let coordinator = Arc::new(ExecutionCoordinator::new(
            executor,
            registry.clone(),
            recovery,
            operational.clone(),
            monitor,
            supervisor.clone(),
            3,
            1,
        ));
        let memory = Arc::new(InMemoryStore::new(
            Arc::new(crate::llm::HashEmbedder),
            100,
        ));
        StrategySelector::new(
            StrategicPlanner::new(llm.clone()),
            TacticalPlanner::new(llm),
            operational,
            coordinator,
            memory,
            supervisor,
            5,
            4,
        )
    }

    #[tokio::test]
    async fn test_first_strategy_succeeds() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(EchoTool);
        let s = selector(Arc::new(MockLlmClient), registry);
        let goal = Goal::new("report progress").with_criterion("success", CriterionPredicate::IsTrue);

        let result = s.run_goal(&goal).await;
        assert_eq!(result.status, GoalStatus::Succeeded);
        assert_eq!(result.attempts_used, 1);
        assert_eq!(result.final_strategy, Some(Strategy::DirectCapability));
        assert_eq!(result.payload["success"], json!(true));
    }

    #[tokio::test]
    async fn test_ambiguous_goal_returns_question_without_attempt() {
        let registry = Arc::new(ToolRegistry::new());
        let llm = Arc::new(ScriptedLlm::new(vec![
            "{\"clarify\": \"which mailbox should I search?\"}".to_string(),
        ]));
        let s = selector(llm, registry);
        let goal = Goal::new("clean up the mailbox");

        let result = s.run_goal(&goal).await;
        assert_eq!(result.status, GoalStatus::NeedsClarification);
        assert_eq!(result.attempts_used, 0);
        assert!(result.question.as_deref().unwrap().contains("mailbox"));
    }

    #[tokio::test]
    async fn test_exhaustion_tries_each_strategy_once() {
        // 注册表为空且合成必然失败：所有策略都会耗尽
        let registry = Arc::new(ToolRegistry::new());
        let s = selector(Arc::new(MockLlmClient), registry);
        let goal = Goal::new("report progress").with_criterion("success", CriterionPredicate::IsTrue);

        let result = s.run_goal(&goal).await;
        assert_eq!(result.status, GoalStatus::Failed);
        assert_eq!(result.attempts_used, 4);
        let strategies: Vec<Strategy> = result.history.iter().map(|a| a.strategy).collect();
        let mut deduped = strategies.clone();
        deduped.dedup();
        assert_eq!(strategies.len(), deduped.len(), "no strategy repeated: {:?}", strategies);
    }
}
