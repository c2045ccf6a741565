mod settings;

pub use settings::{
    LLMConfig, LoggingConfig, McpConfig, SearchConfig, SecurityConfig, Settings, WorkspaceConfig,
};
