//! Error types for keelson
//!
//! Errors are structured so callers can tell the taxonomy classes apart by
//! matching on the variant: configuration violations, operator aborts,
//! orchestration timeouts, tool failures and corrupted persisted state.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Exit code for generic failures (tool, IO, storage)
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when immutable or unsupported violations abort the run
pub const EXIT_VIOLATION: i32 = 2;
/// Exit code when the operator declined a confirmation prompt
pub const EXIT_USER_ABORTED: i32 = 3;
/// Exit code when the orchestration timed out
pub const EXIT_TIMEOUT: i32 = 4;

/// Render an optional configuration value for messages.
///
/// Strings are printed bare, absent values as `<absent>`.
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None => "<absent>".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A single rule violation detected while comparing configurations
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// A path marked immutable changed and no safe exception covered it
    Immutable {
        /// Path of the changed field as written, list indices included
        path: String,
        /// Previously applied value
        from: Option<Value>,
        /// Requested value
        to: Option<Value>,
    },
    /// A transition explicitly listed as unsupported
    Unsupported {
        /// Path of the changed field as written, list indices included
        path: String,
        /// Previously applied value
        from: Option<Value>,
        /// Requested value
        to: Option<Value>,
        /// Reason given by the rule, if any
        reason: Option<String>,
    },
}

impl Violation {
    /// Path the violation refers to
    pub fn path(&self) -> &str {
        match self {
            Violation::Immutable { path, .. } | Violation::Unsupported { path, .. } => path,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Immutable { path, from, to } => write!(
                f,
                "{}: immutable value changed from {} to {}",
                path,
                display_value(from.as_ref()),
                display_value(to.as_ref())
            ),
            Violation::Unsupported {
                reason: Some(reason),
                ..
            } => write!(f, "{}", reason),
            Violation::Unsupported {
                path, from, to, ..
            } => write!(
                f,
                "changing {} from {} to {} is not supported",
                path,
                display_value(from.as_ref()),
                display_value(to.as_ref())
            ),
        }
    }
}

/// Aggregated violations from one preflight run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    /// Number of collected violations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing was collected
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the collected violations
    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    /// Immutable-path violations
    pub fn immutable(&self) -> impl Iterator<Item = &Violation> {
        self.0
            .iter()
            .filter(|v| matches!(v, Violation::Immutable { .. }))
    }

    /// Unsupported-transition violations
    pub fn unsupported(&self) -> impl Iterator<Item = &Violation> {
        self.0
            .iter()
            .filter(|v| matches!(v, Violation::Unsupported { .. }))
    }
}

impl From<Vec<Violation>> for Violations {
    fn from(v: Vec<Violation>) -> Self {
        Self(v)
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let immutable: Vec<_> = self.immutable().collect();
        let unsupported: Vec<_> = self.unsupported().collect();
        let groups = [
            ("immutable field(s) changed", immutable),
            ("unsupported change(s) requested", unsupported),
        ];

        let mut first = true;
        for (title, violations) in groups.iter().filter(|(_, v)| !v.is_empty()) {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{} {}:", violations.len(), title)?;
            for v in violations {
                write!(f, "\n- {}", v)?;
            }
        }
        Ok(())
    }
}

/// Main error type for keelson operations
#[derive(Debug, Error)]
pub enum Error {
    /// Immutable and unsupported violations of one preflight run
    #[error("configuration rejected by the migration rules:\n{0}")]
    Violations(Violations),

    /// The operator declined a confirmation prompt
    #[error("operation aborted by user")]
    UserAborted,

    /// The orchestration did not finish within its deadline
    #[error("timeout after {after:?} while running {scope}")]
    Timeout {
        /// Phase scope that was running ("all" or a phase name)
        scope: String,
        /// Configured deadline
        after: Duration,
    },

    /// A lifecycle phase failed; wraps the underlying error
    #[error("phase {phase} failed: {source}")]
    Phase {
        /// Phase or sub-phase name
        phase: String,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// A phase failed and persisting the upgrade state afterwards failed too
    #[error("{source}; additionally failed to persist upgrade state: {persist}")]
    PersistAfterFailure {
        /// Failure of the phase itself
        #[source]
        source: Box<Error>,
        /// Failure of the state persistence
        persist: Box<Error>,
    },

    /// An external tool invocation failed
    #[error("tool {program} failed: {message}")]
    Tool {
        /// Program that was executed
        program: String,
        /// Description of what failed
        message: String,
        /// Process exit code, if the process exited
        exit_code: Option<i32>,
    },

    /// Malformed rules file
    #[error("rules error [{path}]: {message}")]
    Rules {
        /// Rules file path
        path: String,
        /// Description of what's invalid
        message: String,
    },

    /// Malformed persisted upgrade state
    #[error("upgrade state corrupted: {message}")]
    StateCorrupted {
        /// Description of what's invalid
        message: String,
    },

    /// A phase was requested that the cluster kind does not have
    #[error("phase {phase} is not supported by cluster kind {kind}")]
    UnsupportedPhase {
        /// Cluster kind
        kind: String,
        /// Requested phase
        phase: String,
    },

    /// Cluster-side storage failure
    #[error("storage error [{context}]: {message}")]
    Storage {
        /// Store operation that failed (e.g., "get-config", "store-state")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Invalid user input or configuration
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Context where the error occurred (e.g., "orchestrator")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Filesystem or process IO error
    #[error("io error: {source}")]
    Io {
        /// The underlying IO error
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap an error with the phase it happened in
    pub fn in_phase(phase: impl Into<String>, source: Error) -> Self {
        Self::Phase {
            phase: phase.into(),
            source: Box::new(source),
        }
    }

    /// Create a tool error
    pub fn tool(program: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Tool {
            program: program.into(),
            message: msg.into(),
            exit_code: None,
        }
    }

    /// Create a tool error for a process that exited unsuccessfully
    pub fn tool_exit(program: impl Into<String>, exit_code: Option<i32>, stderr: &str) -> Self {
        let program = program.into();
        let message = match exit_code {
            Some(code) => format!("exited with code {}: {}", code, stderr.trim()),
            None => format!("terminated by signal: {}", stderr.trim()),
        };
        Self::Tool {
            program,
            message,
            exit_code,
        }
    }

    /// Create a rules error
    pub fn rules(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Rules {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a state corruption error
    pub fn state_corrupted(msg: impl Into<String>) -> Self {
        Self::StateCorrupted {
            message: msg.into(),
        }
    }

    /// Create a storage error with context
    pub fn storage(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Storage {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// The innermost error, skipping phase context and persistence wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Phase { source, .. } | Error::PersistAfterFailure { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// True for immutable and unsupported violations
    pub fn is_violation(&self) -> bool {
        matches!(self.root(), Error::Violations(_))
    }

    /// True when the operator declined a prompt
    pub fn is_user_aborted(&self) -> bool {
        matches!(self.root(), Error::UserAborted)
    }

    /// True when the orchestration timed out
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }

    /// Process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        if self.is_violation() {
            EXIT_VIOLATION
        } else if self.is_user_aborted() {
            EXIT_USER_ABORTED
        } else if self.is_timeout() {
            EXIT_TIMEOUT
        } else {
            EXIT_FAILURE
        }
    }
}
