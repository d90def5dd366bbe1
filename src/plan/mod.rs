//! 计划数据模型：目标、三层计划树（arena）、策略与尝试记录

pub mod attempt;
pub mod goal;
pub mod node;

pub use attempt::{AttemptOutcome, Diagnosis, ExecutionAttempt, Strategy};
pub use goal::{CriterionPredicate, Goal, GoalResult, GoalStatus};
pub use node::{NodeId, NodeLevel, NodeStatus, Plan, PlanNode};
