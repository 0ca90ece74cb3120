//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate returns [`AetherResult`]. Errors
//! carry a stable machine-readable `code`, a `category` for coarse routing,
//! a `severity` for recoverability decisions, the `stage` of the pipeline
//! that raised them, and a free-form `details` payload for diagnostics.

use std::fmt;

pub type AetherResult<T> = Result<T, AetherError>;

/// Stable, dotted error codes matching the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Request validation
    RequestValidation,
    RequestContextMissing,

    // Framework / adapter
    FrameworkUnavailable,
    FrameworkInitFailed,

    // Session
    SessionCleared,
    SessionRecoveryFailed,
    SessionNotFound,

    // Runner
    RunnerExecution,
    RunnerNotFound,
    RunnerPoolExhausted,

    // Tool
    ToolNotDeclared,
    ToolInvalidParameters,
    ToolExecution,
    ToolUnauthorized,
    ToolTimeout,

    // Runtime
    RuntimeInternalError,
}

impl ErrorCode {
    /// The dotted wire form used in external-facing error envelopes.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RequestValidation => "request.validation",
            ErrorCode::RequestContextMissing => "request.context_missing",
            ErrorCode::FrameworkUnavailable => "framework.unavailable",
            ErrorCode::FrameworkInitFailed => "framework.init_failed",
            ErrorCode::SessionCleared => "session.cleared",
            ErrorCode::SessionRecoveryFailed => "session.recovery_failed",
            ErrorCode::SessionNotFound => "session.not_found",
            ErrorCode::RunnerExecution => "runner.execution",
            ErrorCode::RunnerNotFound => "runner.not_found",
            ErrorCode::RunnerPoolExhausted => "runner.pool_exhausted",
            ErrorCode::ToolNotDeclared => "tool.not_declared",
            ErrorCode::ToolInvalidParameters => "tool.invalid_parameters",
            ErrorCode::ToolExecution => "tool.execution",
            ErrorCode::ToolUnauthorized => "tool.unauthorized",
            ErrorCode::ToolTimeout => "tool.timeout",
            ErrorCode::RuntimeInternalError => "runtime.internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Request,
    Framework,
    Session,
    Runner,
    Tool,
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct AetherError {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub stage: String,
    pub details: serde_json::Value,
}

impl AetherError {
    pub fn new(
        code: ErrorCode,
        category: ErrorCategory,
        severity: ErrorSeverity,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            category,
            severity,
            message: message.into(),
            stage: stage.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn category(&self) -> &ErrorCategory {
        &self.category
    }

    pub fn severity(&self) -> &ErrorSeverity {
        &self.severity
    }

    /// Low/Medium severity errors are recoverable by the caller retrying or
    /// adjusting the request. High severity only recovers for timeouts.
    /// Critical never recovers.
    pub fn is_recoverable(&self) -> bool {
        match self.severity {
            ErrorSeverity::Low | ErrorSeverity::Medium => true,
            ErrorSeverity::High => self.is_timeout(),
            ErrorSeverity::Critical => false,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ToolExecution
                | ErrorCode::ToolTimeout
                | ErrorCode::RunnerExecution
                | ErrorCode::FrameworkUnavailable
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.code, ErrorCode::ToolTimeout)
    }

    /// Envelope shape for external callers: code, stage, message, details.
    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code.as_str(),
            "stage": self.stage,
            "message": self.message,
            "details": self.details,
        })
    }
}

impl fmt::Display for AetherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}/{}] {} (stage={})",
            self.category, self.code, self.message, self.stage
        )
    }
}

impl std::error::Error for AetherError {}

macro_rules! err_ctor {
    ($fn_name:ident, $code:ident, $category:ident, $severity:ident) => {
        impl AetherError {
            pub fn $fn_name(stage: impl Into<String>, message: impl Into<String>) -> Self {
                Self::new(
                    ErrorCode::$code,
                    ErrorCategory::$category,
                    ErrorSeverity::$severity,
                    stage,
                    message,
                )
            }
        }
    };
}

err_ctor!(request_validation, RequestValidation, Request, Medium);
err_ctor!(request_context_missing, RequestContextMissing, Request, Medium);
err_ctor!(framework_unavailable, FrameworkUnavailable, Framework, High);
err_ctor!(framework_init_failed, FrameworkInitFailed, Framework, Critical);
err_ctor!(session_cleared, SessionCleared, Session, Low);
err_ctor!(session_recovery_failed, SessionRecoveryFailed, Session, High);
err_ctor!(session_not_found, SessionNotFound, Session, Medium);
err_ctor!(runner_execution, RunnerExecution, Runner, High);
err_ctor!(runner_not_found, RunnerNotFound, Runner, Medium);
err_ctor!(runner_pool_exhausted, RunnerPoolExhausted, Runner, High);
err_ctor!(tool_not_declared, ToolNotDeclared, Tool, Medium);
err_ctor!(tool_invalid_parameters, ToolInvalidParameters, Tool, Medium);
err_ctor!(tool_execution, ToolExecution, Tool, High);
err_ctor!(tool_unauthorized, ToolUnauthorized, Tool, Medium);
err_ctor!(tool_timeout, ToolTimeout, Tool, High);
err_ctor!(runtime_internal_error, RuntimeInternalError, Runtime, Critical);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_rules() {
        let low = AetherError::session_cleared("coordinate", "cleared");
        assert!(low.is_recoverable());

        let high_timeout = AetherError::tool_timeout("tool_service.execute", "timed out");
        assert!(high_timeout.is_recoverable());
        assert!(high_timeout.is_timeout());

        let high_non_timeout = AetherError::runner_execution("runner.dispatch", "boom");
        assert!(!high_non_timeout.is_recoverable());

        let critical = AetherError::runtime_internal_error("boot", "panic");
        assert!(!critical.is_recoverable());
    }

    #[test]
    fn envelope_has_stable_fields() {
        let e = AetherError::tool_not_declared("tool_service.resolve", "missing")
            .with_details(serde_json::json!({"tool_name": "web.search"}));
        let env = e.to_envelope();
        assert_eq!(env["code"], "tool.not_declared");
        assert_eq!(env["stage"], "tool_service.resolve");
        assert_eq!(env["details"]["tool_name"], "web.search");
    }
}
