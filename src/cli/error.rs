//! CLI-level errors (wraps infrastructure errors)

use thiserror::Error;

use crate::application::ApplicationError;
use crate::infrastructure::InfraError;

/// CLI errors are the top-level error type.
/// These are what get displayed to the user.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Infra(#[from] InfraError),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Usage(String),
}

impl From<ApplicationError> for CliError {
    fn from(e: ApplicationError) -> Self {
        CliError::Infra(InfraError::Application(e))
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Get the appropriate exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgs(_) | CliError::Usage(_) => crate::exitcode::USAGE,
            CliError::Infra(e) => match e {
                InfraError::Io { .. } => crate::exitcode::IOERR,
                InfraError::Json { .. } => crate::exitcode::DATAERR,
                InfraError::Application(ApplicationError::Config { .. }) => {
                    crate::exitcode::CONFIG
                }
                InfraError::Application(app) => match app.status_hint() {
                    404 => crate::exitcode::NOINPUT,
                    403 => crate::exitcode::NOPERM,
                    422 => crate::exitcode::DATAERR,
                    409 => crate::exitcode::UNAVAILABLE,
                    _ => crate::exitcode::SOFTWARE,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use rstest::rstest;

    #[rstest]
    #[case(DomainError::not_found("template", "T1").into(), crate::exitcode::NOINPUT)]
    #[case(DomainError::Unprocessable("no templates".into()).into(), crate::exitcode::DATAERR)]
    #[case(
        ApplicationError::RunInProgress { repeater: "R".into(), scope: "s".into() },
        crate::exitcode::UNAVAILABLE
    )]
    #[case(ApplicationError::Config { message: "bad".into() }, crate::exitcode::CONFIG)]
    fn given_application_error_when_mapping_then_sysexits_code(
        #[case] error: ApplicationError,
        #[case] expected: i32,
    ) {
        assert_eq!(CliError::from(error).exit_code(), expected);
    }
}
