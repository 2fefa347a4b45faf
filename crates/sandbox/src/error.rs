//! Failures of a sandboxed run.

use thiserror::Error;

/// Why submitted program text could not be run to completion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SandboxError {
    #[error("syntax error: {0}")]
    Parse(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("stopped after {limit} instructions (infinite loop?)")]
    InstructionLimit { limit: u64 },
    #[error("stopped after {millis} ms (infinite loop?)")]
    Timeout { millis: u128 },
    #[error("ran out of memory ({bytes} byte limit)")]
    MemoryLimit { bytes: usize },
    #[error("recorded more than {limit} values")]
    OutputLimit { limit: usize },
    #[error("sandbox setup failed: {0}")]
    Setup(String),
}

/// The innermost error behind any callback wrapping.
pub(crate) fn root_cause(err: &mlua::Error) -> &mlua::Error {
    match err {
        mlua::Error::CallbackError { cause, .. } => root_cause(cause),
        other => other,
    }
}

/// Whether the interpreter gave up on an allocation.
///
/// Buffer growth inside the string library reports this as a plain runtime error.
pub(crate) fn is_out_of_memory(err: &mlua::Error) -> bool {
    match root_cause(err) {
        mlua::Error::MemoryError(_) => true,
        mlua::Error::RuntimeError(message) => message.contains("not enough memory"),
        _ => false,
    }
}

/// Flattens an interpreter error to its first meaningful line.
pub(crate) fn describe(err: &mlua::Error) -> String {
    let text = match err {
        mlua::Error::CallbackError { cause, .. } => return describe(cause),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    };
    text.split("\nstack traceback:")
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn describe_unwraps_callback_errors_and_tracebacks() {
        let inner = mlua::Error::RuntimeError(
            "submission:2: boom\nstack traceback:\n\t[C]: in ?".to_string(),
        );
        let wrapped = mlua::Error::CallbackError {
            traceback: String::new(),
            cause: Arc::new(inner),
        };
        assert_eq!(describe(&wrapped), "submission:2: boom");
    }
}
