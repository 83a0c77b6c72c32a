//! Error types for the CLI

use std::path::PathBuf;

use keelson_common::error::EXIT_FAILURE;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Keelson(#[from] keelson_common::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    /// Process exit code; library errors keep their taxonomy class
    pub fn exit_code(&self) -> u8 {
        let code = match self {
            Error::Keelson(e) => e.exit_code(),
            _ => EXIT_FAILURE,
        };
        u8::try_from(code).unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_common::error::{EXIT_TIMEOUT, EXIT_USER_ABORTED, EXIT_VIOLATION};
    use keelson_common::{Violation, Violations};
    use std::time::Duration;

    #[test]
    fn library_errors_keep_their_exit_code() {
        let violation = Error::from(keelson_common::Error::Violations(Violations(vec![
            Violation::Immutable {
                path: ".spec.region".to_string(),
                from: None,
                to: None,
            },
        ])));
        assert_eq!(violation.exit_code() as i32, EXIT_VIOLATION);

        let aborted = Error::from(keelson_common::Error::UserAborted);
        assert_eq!(aborted.exit_code() as i32, EXIT_USER_ABORTED);

        let timeout = Error::from(keelson_common::Error::in_phase(
            "all",
            keelson_common::Error::Timeout {
                scope: "all".to_string(),
                after: Duration::from_secs(1),
            },
        ));
        assert_eq!(timeout.exit_code() as i32, EXIT_TIMEOUT);
    }

    #[test]
    fn cli_errors_are_generic_failures() {
        assert_eq!(
            Error::validation("bad flag").exit_code() as i32,
            EXIT_FAILURE
        );
        assert_eq!(
            Error::command_failed("boom").to_string(),
            "command failed: boom"
        );
    }
}
