//! Error taxonomy and process exit codes for planet-dumper.
//!
//! Every failure the pipeline can raise is a variant of [`Error`], and every
//! variant maps to exactly one [`ExitCode`] so the binary can report the
//! failure category to its caller.

use crate::types::StageKind;

/// Process exit codes, one per failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    PgDumpError = 100,
    PlanetDumpNgError = 101,
    S3Error = 102,
    BucketDoesNotExist = 103,
    ObjectKeyAlreadyExists = 104,
    RemoteServiceResponseError = 105,
    RemoteServiceUnavailable = 106,
    InvalidStateFile = 107,
    InfoToolError = 108,
    Terminated = 130,
}

impl ExitCode {
    /// Numeric value handed to `std::process::exit`.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Errors raised while producing and publishing a dump.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An external tool exited unsuccessfully.
    #[error("{stage} stage failed: {executable} exited with {}", describe_exit(.exit_code))]
    StageExecution {
        stage: StageKind,
        executable: String,
        exit_code: Option<i32>,
    },

    /// An external tool could not be spawned at all.
    #[error("failed to dispatch {executable}: {source}")]
    Dispatch {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    /// The remote state document did not contain a sequence number.
    #[error("invalid state file: {0}")]
    InvalidStateDocument(String),

    /// No response was received from an upstream service.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An upstream service answered with a non-success status.
    #[error("upstream responded with status {status}: {message}")]
    UpstreamResponse { status: u16, message: String },

    /// Generic object store failure.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// The destination bucket failed its existence check.
    #[error("bucket {bucket} does not exist")]
    BucketNotFound { bucket: String },

    /// The destination key is already taken.
    #[error("object key {key} already exists on bucket {bucket}")]
    ObjectAlreadyExists { bucket: String, key: String },

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run was interrupted by a termination signal.
    #[error("terminated by signal")]
    Terminated,

    #[error("{0}")]
    General(String),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

impl Error {
    /// Create a stage execution error.
    pub fn stage_failed(
        stage: StageKind,
        executable: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::StageExecution {
            stage,
            executable: executable.into(),
            exit_code,
        }
    }

    /// Create an object store error.
    pub fn object_store(msg: impl Into<String>) -> Self {
        Self::ObjectStore(msg.into())
    }

    /// Create an invalid state document error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidStateDocument(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an unclassified error.
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }

    /// The exit code reported when this error ends the run.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::StageExecution { stage, .. } => match stage {
                StageKind::PrimaryDump => ExitCode::PgDumpError,
                StageKind::Conversion => ExitCode::PlanetDumpNgError,
                StageKind::Info => ExitCode::InfoToolError,
            },
            Self::InvalidStateDocument(_) => ExitCode::InvalidStateFile,
            Self::UpstreamUnavailable(_) => ExitCode::RemoteServiceUnavailable,
            Self::UpstreamResponse { .. } => ExitCode::RemoteServiceResponseError,
            Self::ObjectStore(_) => ExitCode::S3Error,
            Self::BucketNotFound { .. } => ExitCode::BucketDoesNotExist,
            Self::ObjectAlreadyExists { .. } => ExitCode::ObjectKeyAlreadyExists,
            Self::Terminated => ExitCode::Terminated,
            Self::Dispatch { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::General(_) => ExitCode::GeneralError,
        }
    }
}

/// Result type alias using the planet-dumper Error type.
pub type Result<T> = std::result::Result<T, Error>;
