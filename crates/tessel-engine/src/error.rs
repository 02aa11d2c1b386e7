use tessel_codegen::CompileError;
use tessel_events::ItemId;
use thiserror::Error;

/// Faults raised while a script runs
///
/// The first four are control signals routed by the executor; only
/// `Unclassified` is reported to the owner.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptFault {
    #[error("script requested deletion of its object")]
    SelfDelete,
    #[error("script requested its own removal")]
    ScriptDelete,
    #[error("execution aborted")]
    Abort,
    #[error("event dropped by minimum event delay")]
    MinDelay,
    #[error("({line}, {column}): {message}")]
    Unclassified {
        message: String,
        line: u32,
        column: u32,
    },
}

impl ScriptFault {
    /// A runtime fault whose position is filled in by the interpreter
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptFault::Unclassified {
            message: message.into(),
            line: 0,
            column: 0,
        }
    }

    pub fn is_control(&self) -> bool {
        !matches!(self, ScriptFault::Unclassified { .. })
    }
}

/// Reasons a compiled module could not be placed in a sandbox domain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("no sandbox domain is available")]
    SandboxUnavailable,
    #[error("module imports '{0}', which its permission tier does not grant")]
    PermissionDenied(String),
    #[error("module imports unknown host function '{0}'")]
    UnknownImport(String),
    #[error("sandbox domain is full")]
    DomainFull,
}

/// Errors returned by the engine's public operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("event '{event}' expects {expected} argument(s), got {found}")]
    BadArguments {
        event: String,
        expected: usize,
        found: usize,
    },
    #[error("script {0} is already running")]
    AlreadyRunning(ItemId),
    #[error("script {0} is not running")]
    NotFound(ItemId),
    #[error("the engine is disabled")]
    Disabled,
    #[error("the engine is shut down")]
    ShutDown,
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("failed to assemble host module: {0}")]
    Assemble(#[from] crate::vm::AssembleError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("state persistence failed: {0:#}")]
    Persistence(anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclassified_display_carries_position() {
        let fault = ScriptFault::Unclassified {
            message: "Math Error".into(),
            line: 4,
            column: 9,
        };
        assert_eq!(fault.to_string(), "(4, 9): Math Error");
        assert!(!fault.is_control());
        assert!(ScriptFault::Abort.is_control());
    }
}
