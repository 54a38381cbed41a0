pub mod cost;
pub mod provider;
pub mod providers;
pub mod reshape;
pub mod router;
pub mod types;

pub use cost::CostTracker;
pub use provider::LlmProvider;
pub use router::{LlmRouter, RouterError};
pub use types::{CompletionRequest, CompletionResponse, Message, MessageRole, ToolCall, ToolSchema};
