use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The request itself is wrong: bad sequence, options or database title.
///
/// Surfaced as `400 Bad Request`.
#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("No input sequence provided.")]
    MissingSequence,

    #[error("The input sequence is too long ({length} characters, limit {max}).")]
    SequenceTooLong { length: usize, max: usize },

    #[error("No validations specified.")]
    MissingValidations,

    #[error("No database specified.")]
    MissingDatabase,

    #[error("Unknown database: '{0}'.")]
    UnknownDatabase(String),

    /// More than one catalog entry carries this title.
    #[error("Database title '{title}' matches {count} databases.")]
    AmbiguousDatabase { title: String, count: usize },
}

/// Infrastructure failures: writing the input file, running BLAST,
/// `get_raw_sequences` or GeneValidator. Only of concern to admins.
///
/// Surfaced as `500 Internal Server Error`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unable to create run directory {path:?}: {source}")]
    RunDir { path: PathBuf, source: io::Error },

    #[error("GeneValidatorApp was unable to create the input file {0:?}.")]
    InputFile(PathBuf),

    #[error("{stage} could not be started: {source}")]
    Spawn { stage: String, source: io::Error },

    #[error("{stage} exited with exit code: {}", .code.map_or("none (killed by signal)".to_string(), |c| c.to_string()))]
    StageFailed { stage: String, code: Option<i32> },

    #[error("{stage} did not finish within {timeout:?}")]
    Timeout { stage: String, timeout: Duration },

    #[error("{stage} did not produce the required output file {path:?}.")]
    MissingArtifact { stage: String, path: PathBuf },

    #[error("unable to parse output file {path:?}: {source}")]
    OutputJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Everything a run can fail with.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl RunError {
    /// Whether the caller is at fault (as opposed to the server).
    pub fn is_argument(&self) -> bool {
        matches!(self, RunError::Argument(_))
    }
}

impl From<io::Error> for RunError {
    fn from(e: io::Error) -> Self {
        RunError::Runtime(RuntimeError::Io(e))
    }
}

pub type Result<T, E = RunError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_message() {
        let err = RuntimeError::StageFailed {
            stage: "BLAST".into(),
            code: Some(2),
        };
        assert_eq!(err.to_string(), "BLAST exited with exit code: 2");

        let err = RuntimeError::StageFailed {
            stage: "GeneValidator".into(),
            code: None,
        };
        assert!(err.to_string().contains("GeneValidator"));
        assert!(err.to_string().contains("signal"));
    }

    #[test]
    fn test_error_category() {
        let err: RunError = ArgumentError::MissingSequence.into();
        assert!(err.is_argument());
        let err: RunError = RuntimeError::InputFile(PathBuf::from("x")).into();
        assert!(!err.is_argument());
        let err: RunError = io::Error::new(io::ErrorKind::Other, "disk").into();
        assert!(!err.is_argument());
    }
}
