//! 安全监察：独立任务中的策略评估，失败关闭
//!
//! 每次工具调用前提交 ActionRequest；监察任务独立运行，协调器经 mpsc +
//! oneshot 请求裁决。超时（monitor_timeout_ms）或通道关闭一律按 Deny 处理，
//! 监察方不可用时不放行任何动作。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::config::SecuritySection;

/// 待裁决的动作：工具名、参数、所属 Step 标题
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub tool: String,
    pub args: Value,
    pub step_title: String,
}

/// 裁决结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny { reason: String },
}

impl Verdict {
    pub fn deny(reason: impl Into<String>) -> Self {
        Verdict::Deny { reason: reason.into() }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// 策略评估协作方：监察任务内逐条检查动作
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn check(&self, action: &ActionRequest) -> Verdict;
}

/// 规则策略：工具名黑名单 + 参数正则黑名单
pub struct RulePolicy {
    denied_tools: HashSet<String>,
    denied_patterns: Vec<Regex>,
}

impl RulePolicy {
    pub fn new(denied_tools: Vec<String>, denied_patterns: Vec<String>) -> Self {
        let denied_patterns = denied_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "忽略无法编译的安全规则");
                    None
                }
            })
            .collect();
        Self {
            denied_tools: denied_tools.into_iter().collect(),
            denied_patterns,
        }
    }

    pub fn from_config(section: &SecuritySection) -> Self {
        Self::new(section.denied_tools.clone(), section.denied_patterns.clone())
    }
}

#[async_trait]
impl PolicyEvaluator for RulePolicy {
    async fn check(&self, action: &ActionRequest) -> Verdict {
        if self.denied_tools.contains(&action.tool) {
            return Verdict::deny(format!("tool '{}' is denied by policy", action.tool));
        }
        let rendered = action.args.to_string();
        for re in &self.denied_patterns {
            if re.is_match(&rendered) {
                return Verdict::deny(format!("arguments match denied pattern '{}'", re.as_str()));
            }
        }
        Verdict::Allow
    }
}

type MonitorRequest = (ActionRequest, oneshot::Sender<Verdict>);

/// 安全监察句柄：克隆后跨任务共享，worker 随所有句柄释放而退出
#[derive(Clone)]
pub struct SecurityMonitor {
    tx: mpsc::Sender<MonitorRequest>,
    timeout: Duration,
}

impl SecurityMonitor {
    /// 启动监察任务并返回句柄
    pub fn spawn(policy: Box<dyn PolicyEvaluator>, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<MonitorRequest>(32);
        tokio::spawn(async move {
            while let Some((action, reply)) = rx.recv().await {
                let verdict = policy.check(&action).await;
                // 协调器可能已超时放弃等待
                let _ = reply.send(verdict);
            }
        });
        Self { tx, timeout }
    }

    pub fn from_config(section: &SecuritySection) -> Self {
        Self::spawn(
            Box::new(RulePolicy::from_config(section)),
            Duration::from_millis(section.monitor_timeout_ms),
        )
    }

    /// 请求裁决；超时或监察任务不可达时返回 Deny
    pub async fn evaluate(&self, action: ActionRequest) -> Verdict {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((action, reply_tx)).await.is_err() {
            warn!("安全监察任务不可达，按 Deny 处理");
            return Verdict::deny("security monitor unavailable");
        }
        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_)) => {
                warn!("安全监察应答通道关闭，按 Deny 处理");
                Verdict::deny("security monitor dropped the request")
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "安全裁决超时，按 Deny 处理");
                Verdict::deny("security verdict timed out")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(tool: &str, args: Value) -> ActionRequest {
        ActionRequest {
            tool: tool.to_string(),
            args,
            step_title: "test step".to_string(),
        }
    }

    #[tokio::test]
    async fn test_rule_policy_allows_by_default() {
        let policy = RulePolicy::new(vec![], vec![]);
        assert!(policy.check(&action("echo", json!({}))).await.is_allow());
    }

    #[tokio::test]
    async fn test_rule_policy_denies_listed_tool_and_pattern() {
        let policy = RulePolicy::new(
            vec!["shell".to_string()],
            vec![r"rm\s+-rf".to_string()],
        );
        assert!(!policy.check(&action("shell", json!({}))).await.is_allow());
        let v = policy
            .check(&action("echo", json!({"text": "rm -rf /"})))
            .await;
        assert!(matches!(v, Verdict::Deny { .. }));
    }

    #[tokio::test]
    async fn test_monitor_round_trip() {
        let monitor = SecurityMonitor::spawn(
            Box::new(RulePolicy::new(vec!["shell".to_string()], vec![])),
            Duration::from_millis(500),
        );
        assert!(monitor.evaluate(action("echo", json!({}))).await.is_allow());
        assert!(!monitor.evaluate(action("shell", json!({}))).await.is_allow());
    }

    struct SlowPolicy;

    #[async_trait]
    impl PolicyEvaluator for SlowPolicy {
        async fn check(&self, _action: &ActionRequest) -> Verdict {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Verdict::Allow
        }
    }

    #[tokio::test]
    async fn test_monitor_timeout_fails_closed() {
        let monitor = SecurityMonitor::spawn(Box::new(SlowPolicy), Duration::from_millis(50));
        let v = monitor.evaluate(action("echo", json!({}))).await;
        assert_eq!(v, Verdict::deny("security verdict timed out"));
    }
}
