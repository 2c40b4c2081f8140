use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes surfaced to hosts. Codes are part of the public
/// contract; messages are not.
pub mod codes {
    /// No probe template applies to the requested model.
    pub const E_NO_APPLICABLE_TEMPLATE: &str = "E_NO_APPLICABLE_TEMPLATE";
    /// The planned suite contains a cross-provider step but no secondary
    /// provider was configured.
    pub const E_SECONDARY_PROVIDER_REQUIRED: &str = "E_SECONDARY_PROVIDER_REQUIRED";
    /// The transport environment is unavailable; nothing reached the wire.
    pub const E_ENV_UNAVAILABLE: &str = "E_ENV_UNAVAILABLE";
    /// A step was driven out of order or re-entered illegally.
    pub const E_SUITE_STATE: &str = "E_SUITE_STATE";
}

/// Structured, host-presentable error. Carries a machine code, free-form
/// context and concrete fix steps; travels through `anyhow` and is recovered
/// at the boundary via [`crate::errors::try_map_error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: String,
    pub source: String,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub fix_steps: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: "error".to_string(),
            source: "core".to_string(),
            message: message.into(),
            context: serde_json::Value::Null,
            fix_steps: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_fix_step(mut self, step: impl Into<String>) -> Self {
        self.fix_steps.push(step.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_accumulates() {
        let d = Diagnostic::new(codes::E_SUITE_STATE, "step 3 not pending")
            .with_source("engine")
            .with_context(json!({"index": 3}))
            .with_fix_step("retry the step after the current one resolves");
        assert_eq!(d.code, codes::E_SUITE_STATE);
        assert_eq!(d.source, "engine");
        assert_eq!(d.context["index"], 3);
        assert_eq!(d.fix_steps.len(), 1);
        assert_eq!(d.to_string(), "E_SUITE_STATE: step 3 not pending");
    }
}
