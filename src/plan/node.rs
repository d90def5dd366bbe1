//! 计划树（Phase / Task / Step）
//!
//! 以节点仲裁区（arena）建模：节点按 id 存放，子节点为 id 列表，父查找为独立的
//! id -> id 映射。没有父子交叉引用，不存在所有权环，序列化（Pause/Resume 快照）
//! 直接走 serde。Plan 在一个目标的生命周期内由 ExecutionCoordinator 独占。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::plan::attempt::Strategy;

pub type NodeId = String;

/// 节点层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeLevel {
    /// 战略层：有序阶段
    Phase,
    /// 战术层：阶段内任务，可声明对兄弟任务的依赖
    Task,
    /// 操作层：单次工具调用与绑定参数
    Step,
}

/// 节点状态机：PENDING -> RUNNING -> {COMPLETED | FAILED | PAUSED | CANCELLED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled
        )
    }
}

/// 计划节点：三层通用，Step 额外携带工具名与参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub level: NodeLevel,
    pub title: String,
    pub description: String,
    pub status: NodeStatus,
    /// 0.0 - 1.0，内部节点为已完成子节点占比
    pub progress: f32,
    /// 仅 Step：分配的工具名
    pub tool: Option<String>,
    /// 仅 Step：绑定参数
    pub args: Value,
    /// 仅 Task：依赖的兄弟任务 id
    pub depends_on: Vec<NodeId>,
    /// Step 命名的工具不在注册表中，待恢复引擎在执行前解决
    pub tool_missing: bool,
    pub failure_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PlanNode {
    fn new(level: NodeLevel, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            level,
            title: title.into(),
            description: description.into(),
            status: NodeStatus::Pending,
            progress: 0.0,
            tool: None,
            args: Value::Object(Default::default()),
            depends_on: Vec::new(),
            tool_missing: false,
            failure_note: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn phase(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(NodeLevel::Phase, title, description)
    }

    pub fn task(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(NodeLevel::Task, title, description)
    }

    pub fn step(
        title: impl Into<String>,
        description: impl Into<String>,
        tool: Option<String>,
        args: Value,
    ) -> Self {
        let mut node = Self::new(NodeLevel::Step, title, description);
        node.tool_missing = tool.is_none();
        node.tool = tool;
        node.args = args;
        node
    }

    pub fn with_dependencies(mut self, depends_on: Vec<NodeId>) -> Self {
        self.depends_on = depends_on;
        self
    }
}

/// 一个目标在一个策略下的计划树
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub strategy: Strategy,
    pub nodes: HashMap<NodeId, PlanNode>,
    pub children: HashMap<NodeId, Vec<NodeId>>,
    pub parent: HashMap<NodeId, NodeId>,
    /// 有序阶段
    pub roots: Vec<NodeId>,
    /// 部分失败等备注，供诊断使用
    pub notes: Vec<String>,
}

impl Plan {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            nodes: HashMap::new(),
            children: HashMap::new(),
            parent: HashMap::new(),
            roots: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn add_phase(&mut self, node: PlanNode) -> NodeId {
        let id = node.id.clone();
        self.children.entry(id.clone()).or_default();
        self.nodes.insert(id.clone(), node);
        self.roots.push(id.clone());
        id
    }

    /// 挂接子节点；父节点不存在时返回 None
    pub fn add_child(&mut self, parent_id: &NodeId, node: PlanNode) -> Option<NodeId> {
        if !self.nodes.contains_key(parent_id) {
            return None;
        }
        let id = node.id.clone();
        self.children.entry(id.clone()).or_default();
        self.nodes.insert(id.clone(), node);
        self.children.entry(parent_id.clone()).or_default().push(id.clone());
        self.parent.insert(id.clone(), parent_id.clone());
        Some(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut PlanNode> {
        self.nodes.get_mut(id)
    }

    pub fn children_of(&self, id: &NodeId) -> &[NodeId] {
        self.children.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.parent.get(id)
    }

    /// 设置状态并维护起止时间戳
    pub fn set_status(&mut self, id: &NodeId, status: NodeStatus) {
        if let Some(node) = self.nodes.get_mut(id) {
            if status == NodeStatus::Running && node.started_at.is_none() {
                node.started_at = Some(Utc::now());
            }
            if status.is_terminal() {
                node.finished_at = Some(Utc::now());
            }
            node.status = status;
            if status == NodeStatus::Completed {
                node.progress = 1.0;
            }
        }
    }

    /// 不变量：仅当所有子节点 COMPLETED 时才允许将内部节点标记为 COMPLETED。
    /// 成功时返回 true。
    pub fn try_complete(&mut self, id: &NodeId) -> bool {
        let children = self.children_of(id).to_vec();
        let all_done = children.iter().all(|c| {
            self.node(c)
                .map(|n| n.status == NodeStatus::Completed)
                .unwrap_or(false)
        });
        if all_done {
            self.set_status(id, NodeStatus::Completed);
        }
        all_done
    }

    /// 自底向上重算 progress：内部节点为已完成子节点占比
    pub fn recompute_progress(&mut self, from: &NodeId) {
        let mut current = Some(from.clone());
        while let Some(id) = current {
            let children = self.children_of(&id).to_vec();
            if !children.is_empty() {
                let total = children.len() as f32;
                let done = children
                    .iter()
                    .filter(|c| {
                        self.node(c)
                            .map(|n| n.status == NodeStatus::Completed)
                            .unwrap_or(false)
                    })
                    .count() as f32;
                if let Some(node) = self.nodes.get_mut(&id) {
                    if node.status != NodeStatus::Completed {
                        node.progress = done / total;
                    }
                }
            }
            current = self.parent.get(&id).cloned();
        }
    }

    /// 阶段内就绪任务：PENDING 且声明的依赖全部 COMPLETED，按声明顺序返回
    pub fn ready_tasks(&self, phase_id: &NodeId) -> Vec<NodeId> {
        self.children_of(phase_id)
            .iter()
            .filter(|task_id| {
                let Some(task) = self.node(task_id) else {
                    return false;
                };
                if task.status != NodeStatus::Pending {
                    return false;
                }
                task.depends_on.iter().all(|dep| {
                    self.node(dep)
                        .map(|n| n.status == NodeStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect()
    }

    /// 阶段内是否存在依赖已失败、永远无法就绪的 PENDING 任务
    pub fn blocked_tasks(&self, phase_id: &NodeId) -> Vec<NodeId> {
        self.children_of(phase_id)
            .iter()
            .filter(|task_id| {
                let Some(task) = self.node(task_id) else {
                    return false;
                };
                task.status == NodeStatus::Pending
                    && task.depends_on.iter().any(|dep| {
                        self.node(dep)
                            .map(|n| {
                                matches!(n.status, NodeStatus::Failed | NodeStatus::Cancelled)
                            })
                            .unwrap_or(false)
                    })
            })
            .cloned()
            .collect()
    }

    /// Stop：所有未终态节点标记 CANCELLED
    pub fn cancel_remaining(&mut self) {
        let ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| !n.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.set_status(&id, NodeStatus::Cancelled);
        }
    }

    /// Pause：所有 RUNNING 节点标记 PAUSED（步边界调用，没有飞行中的工具调用）
    pub fn pause_running(&mut self) {
        let ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.status == NodeStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.set_status(&id, NodeStatus::Paused);
        }
    }

    /// Resume：PAUSED 节点回到 PENDING，等待重新派发
    pub fn resume_paused(&mut self) {
        let ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.status == NodeStatus::Paused)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.status = NodeStatus::Pending;
            }
        }
    }

    /// Task 整体重试：移除旧 Step 子树并挂接重生成的 Steps
    pub fn replace_children(&mut self, task_id: &NodeId, new_children: Vec<PlanNode>) {
        let old: Vec<NodeId> = self.children_of(task_id).to_vec();
        for child_id in old {
            self.nodes.remove(&child_id);
            self.children.remove(&child_id);
            self.parent.remove(&child_id);
        }
        self.children.insert(task_id.clone(), Vec::new());
        for node in new_children {
            self.add_child(task_id, node);
        }
    }

    /// 环境变化恢复：仅移除未完成的 Step 子节点，已完成的保留
    pub fn prune_incomplete_children(&mut self, task_id: &NodeId) -> usize {
        let incomplete: Vec<NodeId> = self
            .children_of(task_id)
            .iter()
            .filter(|c| {
                self.node(c)
                    .map(|n| n.status != NodeStatus::Completed)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        let removed = incomplete.len();
        for child_id in &incomplete {
            self.nodes.remove(child_id);
            self.children.remove(child_id);
            self.parent.remove(child_id);
        }
        if let Some(children) = self.children.get_mut(task_id) {
            children.retain(|c| !incomplete.contains(c));
        }
        removed
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// 全部 Step 节点 id（派发统计与测试用）
    pub fn step_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.level == NodeLevel::Step)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Pause/Resume 快照
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn small_plan() -> (Plan, NodeId, NodeId, NodeId) {
        let mut plan = Plan::new(Strategy::DirectCapability);
        let phase = plan.add_phase(PlanNode::phase("p1", "第一阶段"));
        let task = plan
            .add_child(&phase, PlanNode::task("t1", "第一任务"))
            .unwrap();
        let step = plan
            .add_child(
                &task,
                PlanNode::step("s1", "回显", Some("echo".into()), json!({"text": "hi"})),
            )
            .unwrap();
        (plan, phase, task, step)
    }

    #[test]
    fn test_arena_structure() {
        let (plan, phase, task, step) = small_plan();
        assert_eq!(plan.roots, vec![phase.clone()]);
        assert_eq!(plan.children_of(&phase), &[task.clone()]);
        assert_eq!(plan.parent_of(&step), Some(&task));
    }

    #[test]
    fn test_complete_invariant() {
        let (mut plan, phase, task, step) = small_plan();
        // 子节点未完成时不允许完成父节点
        assert!(!plan.try_complete(&task));
        plan.set_status(&step, NodeStatus::Completed);
        assert!(plan.try_complete(&task));
        assert!(plan.try_complete(&phase));
        assert_eq!(plan.node(&phase).unwrap().status, NodeStatus::Completed);
    }

    #[test]
    fn test_ready_tasks_respect_dependencies() {
        let mut plan = Plan::new(Strategy::Hybrid);
        let phase = plan.add_phase(PlanNode::phase("p", ""));
        let t1 = plan.add_child(&phase, PlanNode::task("t1", "")).unwrap();
        let t2 = plan
            .add_child(&phase, PlanNode::task("t2", "").with_dependencies(vec![t1.clone()]))
            .unwrap();

        assert_eq!(plan.ready_tasks(&phase), vec![t1.clone()]);
        plan.set_status(&t1, NodeStatus::Completed);
        assert_eq!(plan.ready_tasks(&phase), vec![t2.clone()]);
    }

    #[test]
    fn test_blocked_tasks_after_dependency_failure() {
        let mut plan = Plan::new(Strategy::Hybrid);
        let phase = plan.add_phase(PlanNode::phase("p", ""));
        let t1 = plan.add_child(&phase, PlanNode::task("t1", "")).unwrap();
        let t2 = plan
            .add_child(&phase, PlanNode::task("t2", "").with_dependencies(vec![t1.clone()]))
            .unwrap();
        plan.set_status(&t1, NodeStatus::Failed);
        assert_eq!(plan.blocked_tasks(&phase), vec![t2]);
        assert!(plan.ready_tasks(&phase).is_empty());
    }

    #[test]
    fn test_replace_children() {
        let (mut plan, _, task, step) = small_plan();
        plan.replace_children(
            &task,
            vec![PlanNode::step("s2", "新步骤", Some("echo".into()), json!({}))],
        );
        assert!(plan.node(&step).is_none());
        assert_eq!(plan.children_of(&task).len(), 1);
    }

    #[test]
    fn test_prune_keeps_completed_steps() {
        let (mut plan, _, task, s1) = small_plan();
        let s2 = plan
            .add_child(&task, PlanNode::step("s2", "", Some("echo".into()), json!({})))
            .unwrap();
        plan.set_status(&s1, NodeStatus::Completed);
        let removed = plan.prune_incomplete_children(&task);
        assert_eq!(removed, 1);
        assert!(plan.node(&s1).is_some());
        assert!(plan.node(&s2).is_none());
        assert_eq!(plan.children_of(&task), &[s1]);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let (mut plan, _, _, step) = small_plan();
        plan.set_status(&step, NodeStatus::Completed);
        let snapshot = plan.to_json().unwrap();
        let restored = Plan::from_json(&snapshot).unwrap();
        assert_eq!(restored.node(&step).unwrap().status, NodeStatus::Completed);
        assert_eq!(restored.roots, plan.roots);
    }

    #[test]
    fn test_progress_propagation() {
        let mut plan = Plan::new(Strategy::DirectCapability);
        let phase = plan.add_phase(PlanNode::phase("p", ""));
        let task = plan.add_child(&phase, PlanNode::task("t", "")).unwrap();
        let s1 = plan
            .add_child(&task, PlanNode::step("s1", "", Some("echo".into()), json!({})))
            .unwrap();
        let _s2 = plan
            .add_child(&task, PlanNode::step("s2", "", Some("echo".into()), json!({})))
            .unwrap();
        plan.set_status(&s1, NodeStatus::Completed);
        plan.recompute_progress(&s1);
        assert!((plan.node(&task).unwrap().progress - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_pause_resume_cycle() {
        let (mut plan, _, task, _) = small_plan();
        plan.set_status(&task, NodeStatus::Running);
        plan.pause_running();
        assert_eq!(plan.node(&task).unwrap().status, NodeStatus::Paused);
        plan.resume_paused();
        assert_eq!(plan.node(&task).unwrap().status, NodeStatus::Pending);
    }
}
