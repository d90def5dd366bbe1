//! 核心层：错误、宿主控制、恢复引擎、执行协调与策略选择

pub mod coordinator;
pub mod error;
pub mod recovery;
pub mod strategy;
pub mod supervisor;

pub use coordinator::{ExecutionCoordinator, ExecutionReport, ExecutionStatus};
pub use error::AgentError;
pub use recovery::{classify, ErrorClass, RecoveryAction, RecoveryEngine};
pub use strategy::StrategySelector;
pub use supervisor::Supervisor;
