use crate::dns::ResolutionError;
use crate::model::{JobId, SourceId};
use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    /// Malformed job submission, the job is never created.
    InvalidRequest(String),

    /// One passive source failed, recorded on the job and never escalated.
    SourceUnavailable {
        source: SourceId,
        cause: String,
    },

    #[from]
    Resolution(ResolutionError),

    /// The brute-force word source could not be read.
    Wordlist(String),

    JobNotFound(JobId),

    /// Faults of the engine itself, the only ones failing a running job.
    Orchestration(String),

    /// The external fast resolver could not complete a run.
    ExternalTool(String),

    CliUsage(String),

    #[from]
    SystemTime(std::time::SystemTimeError),

    #[from]
    Fmt(std::fmt::Error),

    #[from]
    File(std::io::Error),

    #[from]
    Json(serde_json::Error),

    #[from]
    Reqwest(reqwest::Error),
}

impl Error {
    pub fn source_unavailable(source: SourceId, cause: impl ToString) -> Self {
        Self::SourceUnavailable {
            source,
            cause: cause.to_string(),
        }
    }
}

// region:    --- Error Boilerplate

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}

// endregion: --- Error Boilerplate
