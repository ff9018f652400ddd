use libips::actions::executors::InstallerError;
use libips::fmri::FmriError;
use libips::image::ImageError;
use libips::solver::SolverError;
use miette::Diagnostic;
use thiserror::Error;

/// Result type for pkg6 operations
pub type Result<T> = std::result::Result<T, Pkg6Error>;

/// Errors that can occur in pkg6 operations.
///
/// Every variant maps to one of the exit codes in the distilled spec's
/// "Exit codes" table via [`Pkg6Error::exit_code`]; `main` uses that
/// mapping instead of relying on `std::process::Termination`'s blanket
/// "any `Err` is exit code 1" behavior.
#[derive(Debug, Error, Diagnostic)]
pub enum Pkg6Error {
    #[error("I/O error: {0}")]
    #[diagnostic(
        code(pkg6::io_error),
        help("Check system resources and permissions")
    )]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(
        code(pkg6::json_error),
        help("Check the JSON format and try again")
    )]
    JsonError(#[from] serde_json::Error),

    #[error("FMRI error: {0}")]
    #[diagnostic(
        code(pkg6::fmri_error),
        help("Check the package FMRI format and try again")
    )]
    FmriError(#[from] FmriError),

    #[error("Image error: {0}")]
    #[diagnostic(
        code(pkg6::image_error),
        help("Check the image configuration and try again")
    )]
    ImageError(#[from] ImageError),

    #[error("Solver error: {0}")]
    #[diagnostic(
        code(pkg6::solver_error),
        help("Check package names and repository catalogs")
    )]
    SolverError(#[from] SolverError),

    #[error("Action plan error: {0}")]
    #[diagnostic(
        code(pkg6::actuator_error),
        help("An action failed to apply to the image; the image may need a rollback")
    )]
    ActuatorError(#[from] InstallerError),

    #[error("logging environment setup error: {0}")]
    #[diagnostic(
        code(pkg6::logging_env_error),
        help("Check your logging environment configuration and try again")
    )]
    LoggingEnvError(String),

    #[error("unsupported output format: {0}")]
    #[diagnostic(
        code(pkg6::unsupported_output_format),
        help("Supported output formats: table, json, tsv")
    )]
    UnsupportedOutputFormat(String),

    #[error("usage error: {0}")]
    #[diagnostic(code(pkg6::usage_error), help("See 'pkg6 --help' for usage"))]
    UsageError(String),

    #[error("nothing to do")]
    #[diagnostic(code(pkg6::nothing_to_do))]
    NothingToDo,

    #[error("other error: {0}")]
    #[diagnostic(code(pkg6::other_error), help("See error message for details"))]
    Other(String),
}

/// Convert a string to a Pkg6Error::Other
impl From<String> for Pkg6Error {
    fn from(s: String) -> Self {
        Pkg6Error::Other(s)
    }
}

/// Convert a &str to a Pkg6Error::Other
impl From<&str> for Pkg6Error {
    fn from(s: &str) -> Self {
        Pkg6Error::Other(s.to_string())
    }
}

impl Pkg6Error {
    /// Exit code this error should surface as, per the distilled spec's
    /// "Exit codes" table (§6): 0 ok, 1 generic failure, 2 usage error,
    /// 3 partial success, 4 nothing to do, 5 currently locked,
    /// 6 actuator failure, 7 operation diverged.
    ///
    /// `ImageError::Locked` is the only way an image-level lock
    /// contention currently surfaces; linked-image divergence (exit 7)
    /// and multi-origin partial failure (exit 3) are reported by
    /// `libips::linked`/`libips::transport` directly to callers that use
    /// those APIs and aren't yet routed through a `pkg6` subcommand.
    pub fn exit_code(&self) -> i32 {
        match self {
            Pkg6Error::ImageError(ImageError::Locked(_)) => 5,
            Pkg6Error::UsageError(_) | Pkg6Error::UnsupportedOutputFormat(_) => 2,
            Pkg6Error::NothingToDo => 4,
            Pkg6Error::ActuatorError(_) => 6,
            _ => 1,
        }
    }
}
