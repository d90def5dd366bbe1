//! 三层规划器：战略（阶段）/ 战术（任务）/ 操作（步骤）

pub mod decompose;
pub mod operational;
pub mod strategic;
pub mod tactical;

pub use decompose::{DecomposeOutcome, DraftNode, PlanContext};
pub use operational::OperationalPlanner;
pub use strategic::{StrategicOutcome, StrategicPlanner};
pub use tactical::TacticalPlanner;
