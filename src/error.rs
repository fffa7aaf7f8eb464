use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GdcError {
    #[error("missing required configuration key: {0}")]
    MissingConfigKey(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("unsupported loadfile format: {0}")]
    InvalidFormat(String),

    #[error("unrecognized program: {0}")]
    UnknownProgram(String),

    #[error("unrecognized project: {0}")]
    UnknownProject(String),

    #[error("invalid datestamp: {0}")]
    InvalidDatestamp(String),

    #[error("datestamp {datestamp} not available: {reason}")]
    MissingDatestamp { datestamp: String, reason: String },

    #[error("GDC request failed: {0}")]
    GdcHttp(String),

    #[error("GDC returned status {status}: {message}")]
    GdcStatus { status: u16, message: String },

    #[error("failed to decode GDC response: {message}\nresponse body: {body}")]
    Decode { message: String, body: String },

    #[error("expected mirror file is missing: {0}")]
    MissingMirrorFile(PathBuf),

    #[error("hash mismatch for {file}: recorded {recorded}, expected {expected}")]
    HashMismatch {
        file: String,
        recorded: String,
        expected: String,
    },

    #[error("file name has no recognized extension: {0}")]
    UnrecognizedExtension(String),

    #[error("annotation table error: {0}")]
    AnnotationTable(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("invalid file metadata: {0}")]
    Metadata(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to acquire lock {path}: {message}")]
    Lock { path: PathBuf, message: String },

    #[error("download of {file_id} failed after {attempts} attempts: {message}")]
    DownloadFailed {
        file_id: String,
        attempts: usize,
        message: String,
    },

    #[error("{stage} failed for {failed} of {total} projects")]
    StageFailed {
        stage: String,
        failed: usize,
        total: usize,
    },
}

impl GdcError {
    pub fn fs(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        GdcError::Filesystem(format!("{context}: {err}"))
    }
}
