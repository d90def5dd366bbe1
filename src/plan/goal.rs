//! 目标与结果类型
//!
//! Goal 为不可变值：自由文本 + 结构化成功判据 + 可选截止时间；创建后不再修改，
//! 澄清内容以追加的方式进入新的 Goal（NEEDS_CLARIFICATION 恢复路径）。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::attempt::{ExecutionAttempt, Strategy};

/// 单个成功判据：对结果载荷中命名字段的谓词
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CriterionPredicate {
    /// 字段必须为 true
    IsTrue,
    /// 字段必须等于给定值
    Equals(Value),
    /// 字段必须为不小于阈值的数字
    AtLeast(f64),
}

impl CriterionPredicate {
    /// 对载荷（JSON 对象）中 key 对应的字段求值
    pub fn evaluate(&self, payload: &Value, key: &str) -> bool {
        let field = match payload.get(key) {
            Some(v) => v,
            None => return false,
        };
        match self {
            CriterionPredicate::IsTrue => field.as_bool() == Some(true),
            CriterionPredicate::Equals(expected) => field == expected,
            CriterionPredicate::AtLeast(min) => field.as_f64().map(|v| v >= *min).unwrap_or(false),
        }
    }
}

/// 用户目标：描述、成功判据、可选截止时间与已追加的澄清
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub description: String,
    /// 判据名 -> 谓词；全部成立才算成功
    pub criteria: BTreeMap<String, CriterionPredicate>,
    pub deadline: Option<DateTime<Utc>>,
    /// NEEDS_CLARIFICATION 后由用户补充的澄清，按追加顺序保存
    pub clarifications: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            criteria: BTreeMap::new(),
            deadline: None,
            clarifications: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_criterion(mut self, name: impl Into<String>, predicate: CriterionPredicate) -> Self {
        self.criteria.insert(name.into(), predicate);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// 带澄清重建目标（原目标不变）
    pub fn with_clarification(mut self, clarification: impl Into<String>) -> Self {
        self.clarifications.push(clarification.into());
        self
    }

    /// 规划时使用的完整上下文文本：描述 + 澄清
    pub fn context_text(&self) -> String {
        if self.clarifications.is_empty() {
            self.description.clone()
        } else {
            format!(
                "{}\nClarifications: {}",
                self.description,
                self.clarifications.join("; ")
            )
        }
    }

    /// 返回未满足的判据名列表；空列表即全部满足
    pub fn unmet_criteria(&self, payload: &Value) -> Vec<String> {
        self.criteria
            .iter()
            .filter(|(name, pred)| !pred.evaluate(payload, name))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// 目标终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalStatus {
    Succeeded,
    Failed,
    /// 目标含糊，携带问题载荷等待用户澄清后重跑
    NeedsClarification,
    Cancelled,
}

/// 目标执行结果：状态、摘要、载荷与完整的尝试/诊断历史
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalResult {
    pub status: GoalStatus,
    pub summary: String,
    /// 执行产出载荷（JSON 对象），判据在其上求值
    pub payload: Value,
    pub attempts_used: usize,
    pub final_strategy: Option<Strategy>,
    pub history: Vec<ExecutionAttempt>,
    /// NeedsClarification 时的问题
    pub question: Option<String>,
}

impl GoalResult {
    pub fn succeeded(
        summary: impl Into<String>,
        payload: Value,
        attempts_used: usize,
        final_strategy: Strategy,
        history: Vec<ExecutionAttempt>,
    ) -> Self {
        Self {
            status: GoalStatus::Succeeded,
            summary: summary.into(),
            payload,
            attempts_used,
            final_strategy: Some(final_strategy),
            history,
            question: None,
        }
    }

    pub fn failed(
        summary: impl Into<String>,
        attempts_used: usize,
        history: Vec<ExecutionAttempt>,
    ) -> Self {
        Self {
            status: GoalStatus::Failed,
            summary: summary.into(),
            payload: Value::Object(Default::default()),
            attempts_used,
            final_strategy: None,
            history,
            question: None,
        }
    }

    pub fn needs_clarification(
        question: impl Into<String>,
        attempts_used: usize,
        history: Vec<ExecutionAttempt>,
    ) -> Self {
        let question = question.into();
        Self {
            status: GoalStatus::NeedsClarification,
            summary: format!("Clarification required: {}", question),
            payload: Value::Object(Default::default()),
            attempts_used,
            final_strategy: None,
            history,
            question: Some(question),
        }
    }

    pub fn cancelled(attempts_used: usize, history: Vec<ExecutionAttempt>) -> Self {
        Self {
            status: GoalStatus::Cancelled,
            summary: "Cancelled by host".to_string(),
            payload: Value::Object(Default::default()),
            attempts_used,
            final_strategy: None,
            history,
            question: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_criterion_is_true() {
        let pred = CriterionPredicate::IsTrue;
        assert!(pred.evaluate(&json!({"found": true}), "found"));
        assert!(!pred.evaluate(&json!({"found": false}), "found"));
        assert!(!pred.evaluate(&json!({}), "found"));
    }

    #[test]
    fn test_criterion_at_least() {
        let pred = CriterionPredicate::AtLeast(3.0);
        assert!(pred.evaluate(&json!({"count": 5}), "count"));
        assert!(!pred.evaluate(&json!({"count": 2}), "count"));
        assert!(!pred.evaluate(&json!({"count": "five"}), "count"));
    }

    #[test]
    fn test_unmet_criteria() {
        let goal = Goal::new("find matching orders")
            .with_criterion("found", CriterionPredicate::IsTrue)
            .with_criterion("count", CriterionPredicate::AtLeast(1.0));
        let unmet = goal.unmet_criteria(&json!({"found": true, "count": 0}));
        assert_eq!(unmet, vec!["count".to_string()]);
        assert!(goal
            .unmet_criteria(&json!({"found": true, "count": 3}))
            .is_empty());
    }

    #[test]
    fn test_clarification_appends_context() {
        let goal = Goal::new("整理这些文件").with_clarification("只处理 PDF");
        assert!(goal.context_text().contains("只处理 PDF"));
        assert_eq!(goal.description, "整理这些文件");
    }
}
