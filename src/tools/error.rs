//! Error types for tool creation and execution.

/// Failures surfaced by the lifecycle controller and the store.
///
/// Executor faults are not represented here: a failed run is an
/// [`ExecutionResult`](super::ExecutionResult) with `success == false`.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The name cannot be used as an artifact stem.
    #[error("Invalid tool name '{0}': use letters, digits, '_' or '-'")]
    InvalidName(String),

    /// Generation, validation or persistence of a new tool failed.
    #[error("Failed to create tool '{name}': {reason}")]
    Creation { name: String, reason: String },

    /// No tool with this name exists on disk.
    #[error("Tool '{0}' not found")]
    NotFound(String),

    /// Metadata exists but the source artifact is missing or unreadable.
    #[error("Tool '{name}' is inconsistent: {reason}")]
    Inconsistent { name: String, reason: String },

    /// The tool ran but reported failure.
    #[error("Tool '{name}' execution failed: {reason}")]
    Execution { name: String, reason: String },
}

impl ToolError {
    pub fn creation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ToolError::Creation {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_tool() {
        let err = ToolError::NotFound("NoSuchTool".to_string());
        assert_eq!(err.to_string(), "Tool 'NoSuchTool' not found");

        let err = ToolError::creation("Broken", "failed syntax validation");
        assert!(err.to_string().contains("'Broken'"));
        assert!(err.to_string().contains("failed syntax validation"));
    }
}
