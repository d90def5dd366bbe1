//! ant - 自主目标执行引擎
//!
//! 把用户目标经三层规划（战略阶段 / 战术任务 / 操作步骤）展开为计划树，
//! 由执行协调器驱动工具调用落地；失败经恢复引擎分类处置（合成缺失工具、
//! 修正参数、重生成步骤、退避重试），策略选择器在多种方法族间自适应切换，
//! 安全监察在独立任务中对每次工具调用做失败关闭的裁决，执行结果归档入
//! 记忆库供后续目标召回。

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod planner;
pub mod security;
pub mod tools;

pub use agent::Agent;
pub use config::{load_config, reload_config, AppConfig};
pub use core::{AgentError, ExecutionReport, ExecutionStatus, StrategySelector, Supervisor};
pub use plan::{CriterionPredicate, Goal, GoalResult, GoalStatus, Plan, Strategy};
