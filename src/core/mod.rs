pub mod llm;
pub mod prompts;
pub mod search;

pub use llm::{CodeGenerator, GenerationError, LLMClient};
pub use search::{NoSearch, SearchHit, SearchProvider, WebSearch};
