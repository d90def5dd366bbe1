//! 执行协调器
//!
//! 驱动计划树落地：阶段按序执行，阶段内任务按依赖就绪顺序执行，任务内步骤
//! 严格顺序执行。每个步骤：缺失工具先走合成恢复，安全裁决通过后派发执行，
//! 失败交恢复引擎给出动作；单步执行次数封顶 step_retry_limit，任务重试
//! （重生成步骤，环境变化时保留已完成的步骤）封顶 task_retry_limit。
//! 宿主 Pause/Stop 只在步边界生效。

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::core::error::AgentError;
use crate::core::recovery::{RecoveryAction, RecoveryEngine};
use crate::core::supervisor::Supervisor;
use crate::plan::{NodeId, NodeStatus, Plan};
use crate::planner::{OperationalPlanner, PlanContext};
use crate::security::{ActionRequest, SecurityMonitor, Verdict};
use crate::tools::{ToolExecutor, ToolRegistry};

/// 一次计划执行的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Failed,
    /// 宿主暂停；计划可序列化保存，恢复后重新 run 继续
    Paused,
    Cancelled,
}

/// 执行报告：终态、合并载荷与统计
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    /// 各步骤输出合并成的 JSON 对象，成功判据在其上求值
    pub payload: Value,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub notes: Vec<String>,
}

enum StepOutcome {
    Completed {
        tool: String,
        value: Value,
    },
    Failed {
        note: String,
        /// 安全拒绝等不可重试的失败，任务不再重试
        fatal: bool,
        /// 环境已变化：仅重生成未完成的步骤，已完成的保留
        regenerate: bool,
    },
    Interrupted(Interrupt),
}

enum TaskOutcome {
    Completed,
    Failed,
    Interrupted(Interrupt),
}

#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Paused,
    Cancelled,
}

/// 将步骤输出并入载荷：对象按字段合并，其余挂在工具名下
fn merge_payload(payload: &mut Value, tool: &str, value: Value) {
    let Some(root) = payload.as_object_mut() else {
        return;
    };
    match value {
        Value::Object(fields) => {
            for (k, v) in fields {
                root.insert(k, v);
            }
        }
        other => {
            root.insert(tool.to_string(), other);
        }
    }
}

pub struct ExecutionCoordinator {
    executor: Arc<ToolExecutor>,
    registry: Arc<ToolRegistry>,
    recovery: Arc<RecoveryEngine>,
    operational: Arc<OperationalPlanner>,
    monitor: SecurityMonitor,
    supervisor: Supervisor,
    step_retry_limit: u32,
    task_retry_limit: u32,
}

impl ExecutionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<ToolExecutor>,
        registry: Arc<ToolRegistry>,
        recovery: Arc<RecoveryEngine>,
        operational: Arc<OperationalPlanner>,
        monitor: SecurityMonitor,
        supervisor: Supervisor,
        step_retry_limit: u32,
        task_retry_limit: u32,
    ) -> Self {
        Self {
            executor,
            registry,
            recovery,
            operational,
            monitor,
            supervisor,
            step_retry_limit: step_retry_limit.max(1),
            task_retry_limit,
        }
    }

    pub fn supervisor(&self) -> Supervisor {
        self.supervisor.clone()
    }

    /// 执行整个计划；Paused 后用同一 Plan 再次调用即从断点继续
    pub async fn run(&self, plan: &mut Plan, ctx: &PlanContext) -> ExecutionReport {
        plan.resume_paused();
        let mut payload = Value::Object(Default::default());
        let mut completed_steps = 0usize;
        let mut failed_steps = 0usize;

        for phase_id in plan.roots.clone() {
            if plan.node(&phase_id).map(|n| n.status) == Some(NodeStatus::Completed) {
                continue;
            }
            plan.set_status(&phase_id, NodeStatus::Running);

            loop {
                if self.supervisor.is_stopped() {
                    plan.cancel_remaining();
                    return self.report(ExecutionStatus::Cancelled, plan, payload, completed_steps, failed_steps);
                }
                if self.supervisor.is_paused() {
                    plan.pause_running();
                    return self.report(ExecutionStatus::Paused, plan, payload, completed_steps, failed_steps);
                }

                let ready = plan.ready_tasks(&phase_id);
                if ready.is_empty() {
                    // 依赖已失败、永远无法就绪的任务直接判失败
                    for blocked in plan.blocked_tasks(&phase_id) {
                        let title = plan.node(&blocked).map(|n| n.title.clone()).unwrap_or_default();
                        plan.set_status(&blocked, NodeStatus::Failed);
                        plan.add_note(format!("task '{}' blocked by a failed dependency", title));
                    }
                    break;
                }

                for task_id in ready {
                    match self
                        .run_task(plan, &task_id, ctx, &mut payload, &mut completed_steps, &mut failed_steps)
                        .await
                    {
                        TaskOutcome::Completed | TaskOutcome::Failed => {}
                        TaskOutcome::Interrupted(Interrupt::Paused) => {
                            plan.pause_running();
                            return self.report(ExecutionStatus::Paused, plan, payload, completed_steps, failed_steps);
                        }
                        TaskOutcome::Interrupted(Interrupt::Cancelled) => {
                            plan.cancel_remaining();
                            return self.report(ExecutionStatus::Cancelled, plan, payload, completed_steps, failed_steps);
                        }
                    }
                }
            }

            if !plan.try_complete(&phase_id) {
                let title = plan.node(&phase_id).map(|n| n.title.clone()).unwrap_or_default();
                plan.set_status(&phase_id, NodeStatus::Failed);
                plan.add_note(format!("phase '{}' failed", title));
                return self.report(ExecutionStatus::Failed, plan, payload, completed_steps, failed_steps);
            }
            plan.recompute_progress(&phase_id);
        }

        self.report(ExecutionStatus::Completed, plan, payload, completed_steps, failed_steps)
    }

    fn report(
        &self,
        status: ExecutionStatus,
        plan: &Plan,
        payload: Value,
        completed_steps: usize,
        failed_steps: usize,
    ) -> ExecutionReport {
        ExecutionReport {
            status,
            payload,
            completed_steps,
            failed_steps,
            notes: plan.notes.clone(),
        }
    }

    async fn run_task(
        &self,
        plan: &mut Plan,
        task_id: &NodeId,
        ctx: &PlanContext,
        payload: &mut Value,
        completed_steps: &mut usize,
        failed_steps: &mut usize,
    ) -> TaskOutcome {
        let mut retries: u32 = 0;
        loop {
            plan.set_status(task_id, NodeStatus::Running);
            let steps = plan.children_of(task_id).to_vec();
            let mut failure: Option<(String, bool, bool)> = None;

            for step_id in steps {
                if self.supervisor.is_stopped() {
                    return TaskOutcome::Interrupted(Interrupt::Cancelled);
                }
                if self.supervisor.is_paused() {
                    return TaskOutcome::Interrupted(Interrupt::Paused);
                }
                // 恢复路径：已完成的步骤不重跑
                if plan.node(&step_id).map(|n| n.status) == Some(NodeStatus::Completed) {
                    continue;
                }
                match self.run_step(plan, &step_id).await {
                    StepOutcome::Completed { tool, value } => {
                        merge_payload(payload, &tool, value);
                        *completed_steps += 1;
                    }
                    StepOutcome::Failed { note, fatal, regenerate } => {
                        *failed_steps += 1;
                        failure = Some((note, fatal, regenerate));
                        break;
                    }
                    StepOutcome::Interrupted(i) => return TaskOutcome::Interrupted(i),
                }
            }

            let Some((note, fatal, regenerate)) = failure else {
                plan.try_complete(task_id);
                plan.recompute_progress(task_id);
                return TaskOutcome::Completed;
            };

            plan.add_note(note.clone());
            if let Some(node) = plan.node_mut(task_id) {
                node.failure_note = Some(note.clone());
            }
            if fatal || retries >= self.task_retry_limit {
                plan.set_status(task_id, NodeStatus::Failed);
                return TaskOutcome::Failed;
            }

            // 带失败备注重生成步骤；环境变化只重做未完成的步骤
            retries += 1;
            let title = plan.node(task_id).map(|n| n.title.clone()).unwrap_or_default();
            info!(task = %title, retry = retries, regenerate, "重生成任务步骤后重试");
            if regenerate {
                plan.prune_incomplete_children(task_id);
            } else {
                plan.replace_children(task_id, Vec::new());
            }
            if let Err(e) = self.operational.plan_task(plan, task_id, ctx).await {
                warn!(task = %title, error = %e, "任务步骤重生成失败");
                plan.add_note(format!("task '{}' regeneration failed: {}", title, e));
                plan.set_status(task_id, NodeStatus::Failed);
                return TaskOutcome::Failed;
            }
        }
    }

    async fn run_step(&self, plan: &mut Plan, step_id: &NodeId) -> StepOutcome {
        plan.set_status(step_id, NodeStatus::Running);
        let node = match plan.node(step_id) {
            Some(n) => n.clone(),
            None => {
                return StepOutcome::Failed {
                    note: "step node missing from plan".to_string(),
                    fatal: true,
                    regenerate: false,
                }
            }
        };

        // 缺失工具在首次执行前解决（合成 + 校验注册）
        let mut tool = node.tool.clone();
        let unresolved = node.tool_missing
            || tool
                .as_deref()
                .map(|t| !self.registry.contains(t))
                .unwrap_or(true);
        if unresolved {
            let missing = tool.clone().unwrap_or_else(|| "unnamed_capability".to_string());
            match self
                .recovery
                .recover(&node, &AgentError::ToolNotFound(missing), 0)
                .await
            {
                RecoveryAction::RetryWithTool(name) => {
                    if let Some(n) = plan.node_mut(step_id) {
                        n.tool = Some(name.clone());
                        n.tool_missing = false;
                    }
                    tool = Some(name);
                }
                _ => {
                    let note = format!("step '{}' needs a capability that could not be provided", node.title);
                    return self.fail_step(plan, step_id, note, false);
                }
            }
        }
        let Some(mut current_tool) = tool else {
            return self.fail_step(plan, step_id, "step has no tool".to_string(), false);
        };

        // 派发前安全裁决；Deny 永不重试
        let verdict = self
            .monitor
            .evaluate(ActionRequest {
                tool: current_tool.clone(),
                args: node.args.clone(),
                step_title: node.title.clone(),
            })
            .await;
        if let Verdict::Deny { reason } = verdict {
            warn!(step = %node.title, tool = %current_tool, reason = %reason, "安全监察拒绝");
            let note = format!("policy denied: {}", reason);
            return self.fail_step(plan, step_id, note, true);
        }

        let mut args = node.args.clone();
        let mut args_corrected = false;
        let mut executions: u32 = 0;
        loop {
            executions += 1;
            match self.executor.execute(&current_tool, args.clone()).await {
                Ok(value) => {
                    self.registry.record_outcome(&current_tool, true);
                    plan.set_status(step_id, NodeStatus::Completed);
                    plan.recompute_progress(step_id);
                    return StepOutcome::Completed {
                        tool: current_tool,
                        value,
                    };
                }
                Err(error) => {
                    self.registry.record_outcome(&current_tool, false);
                    warn!(step = %node.title, tool = %current_tool, execution = executions, error = %error, "步骤执行失败");

                    if error.is_fatal_for_step() {
                        return self.fail_step(plan, step_id, error.to_string(), true);
                    }
                    if executions >= self.step_retry_limit {
                        let note = format!(
                            "step '{}' failed after {} executions: {}",
                            node.title, executions, error
                        );
                        return self.fail_step(plan, step_id, note, false);
                    }

                    // attempt 从 0 起，首个瞬时退避即为配置的基准时长
                    match self.recovery.recover(&node, &error, executions - 1).await {
                        RecoveryAction::RetryWithTool(name) => {
                            if let Some(n) = plan.node_mut(step_id) {
                                n.tool = Some(name.clone());
                            }
                            current_tool = name;
                        }
                        RecoveryAction::RetryWithArgs(new_args) => {
                            // 参数修正仅允许一次
                            if args_corrected {
                                return self.fail_step(
                                    plan,
                                    step_id,
                                    format!("step '{}' arguments still invalid after correction", node.title),
                                    false,
                                );
                            }
                            args_corrected = true;
                            if let Some(n) = plan.node_mut(step_id) {
                                n.args = new_args.clone();
                            }
                            args = new_args;
                        }
                        RecoveryAction::RegenerateStep => {
                            let note = format!("environment changed during step '{}': {}", node.title, error);
                            plan.set_status(step_id, NodeStatus::Failed);
                            if let Some(n) = plan.node_mut(step_id) {
                                n.failure_note = Some(note.clone());
                            }
                            return StepOutcome::Failed { note, fatal: false, regenerate: true };
                        }
                        RecoveryAction::RetryAfterBackoff(delay) => {
                            tokio::time::sleep(delay).await;
                        }
                        RecoveryAction::Escalate(reason) => {
                            let note = format!("step '{}' not recoverable: {}", node.title, reason);
                            return self.fail_step(plan, step_id, note, false);
                        }
                    }
                }
            }
        }
    }

    fn fail_step(&self, plan: &mut Plan, step_id: &NodeId, note: String, fatal: bool) -> StepOutcome {
        plan.set_status(step_id, NodeStatus::Failed);
        if let Some(n) = plan.node_mut(step_id) {
            n.failure_note = Some(note.clone());
        }
        StepOutcome::Failed { note, fatal, regenerate: false }
    }
}
