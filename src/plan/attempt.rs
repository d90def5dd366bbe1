//! 策略与执行尝试
//!
//! Strategy 为无状态的方法族标签，附在规划上下文上让规划器偏置分解方式；
//! ExecutionAttempt 记录一次 策略 x 目标 的完整运行，关闭后不再修改。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 方法族：直接能力 / 模拟交互 / 混合 / 替代途径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// 优先调用 API / 服务等直接能力
    DirectCapability,
    /// 模拟用户交互（界面操作路径）
    SimulatedInteraction,
    /// 直接能力与模拟交互混合
    Hybrid,
    /// 兜底：换一条与前几次都不同的路径
    AlternativeMethod,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::DirectCapability => "direct_capability",
            Strategy::SimulatedInteraction => "simulated_interaction",
            Strategy::Hybrid => "hybrid",
            Strategy::AlternativeMethod => "alternative_method",
        }
    }

    pub fn all() -> &'static [Strategy] {
        &[
            Strategy::DirectCapability,
            Strategy::SimulatedInteraction,
            Strategy::Hybrid,
            Strategy::AlternativeMethod,
        ]
    }

    /// 所有策略耗尽后的最后手段
    pub fn last_resort() -> Strategy {
        Strategy::AlternativeMethod
    }

    /// 按目标文本关键词给出首选顺序：外部服务类词汇偏向直接能力，
    /// 界面操作类词汇偏向模拟交互，其余用默认顺序。
    pub fn ordered_for(goal_text: &str) -> Vec<Strategy> {
        let lower = goal_text.to_lowercase();
        let service_keywords = ["api", "http", "service", "endpoint", "服务", "接口"];
        let interaction_keywords = ["click", "screen", "type", "window", "点击", "屏幕", "输入框", "界面"];

        let prefers_service = service_keywords.iter().any(|k| lower.contains(k));
        let prefers_interaction = interaction_keywords.iter().any(|k| lower.contains(k));

        if prefers_interaction && !prefers_service {
            vec![
                Strategy::SimulatedInteraction,
                Strategy::DirectCapability,
                Strategy::Hybrid,
                Strategy::AlternativeMethod,
            ]
        } else {
            vec![
                Strategy::DirectCapability,
                Strategy::SimulatedInteraction,
                Strategy::Hybrid,
                Strategy::AlternativeMethod,
            ]
        }
    }

    /// 注入规划提示的策略说明
    pub fn planning_hint(&self) -> &'static str {
        match self {
            Strategy::DirectCapability => {
                "Prefer direct capabilities: call services, APIs and local tools that produce the result directly."
            }
            Strategy::SimulatedInteraction => {
                "Prefer simulated interaction: drive the task the way a user would, through interface-level tools."
            }
            Strategy::Hybrid => {
                "Mix direct capabilities with simulated interaction, choosing per task whichever is more reliable."
            }
            Strategy::AlternativeMethod => {
                "Previous approaches failed. Take a different route than the obvious one and avoid the tools that failed."
            }
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 尝试终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// 结构化诊断：尝试失败原因，用于选择下一个策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub summary: String,
    /// 未满足的判据名
    pub unmet_criteria: Vec<String>,
    /// 执行错误（如有）
    pub error: Option<String>,
    /// 目标含糊时需要用户回答的问题
    pub question: Option<String>,
}

impl Diagnosis {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            unmet_criteria: Vec::new(),
            error: None,
            question: None,
        }
    }

    pub fn with_unmet(mut self, unmet: Vec<String>) -> Self {
        self.unmet_criteria = unmet;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }
}

/// 一次 策略 x 目标 的运行记录；close 后视为不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub strategy: Strategy,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<AttemptOutcome>,
    pub diagnosis: Option<Diagnosis>,
}

impl ExecutionAttempt {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
            diagnosis: None,
        }
    }

    pub fn close(&mut self, outcome: AttemptOutcome, diagnosis: Option<Diagnosis>) {
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
        self.diagnosis = diagnosis;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_for_service_goal() {
        let order = Strategy::ordered_for("Sync records via the billing API");
        assert_eq!(order[0], Strategy::DirectCapability);
    }

    #[test]
    fn test_ordered_for_interaction_goal() {
        let order = Strategy::ordered_for("点击导出按钮并保存屏幕上的报表");
        assert_eq!(order[0], Strategy::SimulatedInteraction);
    }

    #[test]
    fn test_order_contains_all_strategies() {
        let order = Strategy::ordered_for("anything");
        for s in Strategy::all() {
            assert!(order.contains(s));
        }
    }
}
