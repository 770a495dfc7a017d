use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("VOD not found: {0}")]
    VodNotFound(String),

    #[error("VOD already loaded: {0}")]
    DuplicateVod(String),

    #[error("VOD {0} is protected from deletion")]
    DeletionPrevented(String),

    #[error("No segment candidates found for {0}")]
    NoSegmentCandidates(String),

    #[error("Refusing to delete the root VOD folder: {0}")]
    RootFolderDeletion(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid basename: {0}")]
    InvalidBasename(String),

    #[error("Job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },

    #[error("Media probe failed for {path}: {reason}")]
    ProbeFailed { path: String, reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
