pub mod glm;
pub mod openai_compatible;

pub use glm::GlmProvider;
pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
