use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure taxonomy every [`FlowError`] maps onto.
///
/// Executors decide propagation by kind: sequential chains abort on any
/// failure, fan-out isolates failures per slot, and the agent graph records
/// `UnknownTool` as a tool result instead of aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request to a step.
    InvalidInput,
    /// The opaque model or tool call failed or timed out.
    UpstreamFailure,
    /// Text extraction yielded no usable structure.
    ParseFailure,
    /// Dispatch to an unregistered tool name.
    UnknownTool,
    /// Unexpected fault inside orchestration logic.
    InternalError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid_input",
            Self::UpstreamFailure => "upstream_failure",
            Self::ParseFailure => "parse_failure",
            Self::UnknownTool => "unknown_tool",
            Self::InternalError => "internal_error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    // Step errors
    #[error("Invalid step input: {0}")]
    InvalidInput(String),

    #[error("Step timed out after {timeout_ms}ms: {step}")]
    StepTimeout { step: String, timeout_ms: u64 },

    #[error("Step panicked: {step}: {message}")]
    StepPanicked { step: String, message: String },

    // Model errors
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    #[error("Model output did not conform to schema: {0}")]
    NonConforming(String),

    // Plan / text extraction errors
    #[error("Parse error: {0}")]
    Parse(String),

    // Tool errors
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Orchestration errors
    #[error("Agent exceeded max turns ({0})")]
    MaxTurnsExceeded(usize),

    #[error("Internal error: {0}")]
    Internal(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Map this error onto the workflow failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::Config(_) | Self::ConfigNotFound(_) => {
                ErrorKind::InvalidInput
            }
            Self::StepTimeout { .. }
            | Self::ModelRequest(_)
            | Self::NonConforming(_)
            | Self::ToolExecution { .. }
            | Self::ToolTimeout { .. }
            | Self::Io(_) => ErrorKind::UpstreamFailure,
            Self::Parse(_) | Self::Json(_) => ErrorKind::ParseFailure,
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::StepPanicked { .. } | Self::MaxTurnsExceeded(_) | Self::Internal(_) => {
                ErrorKind::InternalError
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_upstream_failures() {
        let err = FlowError::StepTimeout {
            step: "draft".into(),
            timeout_ms: 500,
        };
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
        assert_eq!(err.to_string(), "Step timed out after 500ms: draft");
    }

    #[test]
    fn panics_are_internal_errors() {
        let err = FlowError::StepPanicked {
            step: "worker".into(),
            message: "boom".into(),
        };
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }

    #[test]
    fn unknown_tool_kind() {
        assert_eq!(
            FlowError::UnknownTool("teleport".into()).kind(),
            ErrorKind::UnknownTool
        );
    }

    #[test]
    fn json_errors_are_parse_failures() {
        let err: FlowError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::ParseFailure);
    }
}
