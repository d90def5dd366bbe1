//! 工具箱：注册表、执行器、合成与内建工具（echo / fetch）

pub mod echo;
pub mod executor;
pub mod fetch;
pub mod registry;
pub mod schema;
pub mod synthesis;

pub use echo::EchoTool;
pub use executor::{ToolExecutor, ToolTimeouts};
pub use fetch::FetchTool;
pub use registry::{BlueprintRejection, Tool, ToolDescriptor, ToolKind, ToolRegistry};
pub use schema::step_call_schema_json;
pub use synthesis::{LlmToolSynthesizer, SynthesizedTool, ToolBlueprint, ToolSynthesizer};
