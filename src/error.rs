use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors this crate raises itself, as distinct from the `anyhow::Result`
/// used at command-handler edges that are not part of the typed contract.
#[derive(Debug, Error)]
pub enum FssError {
    #[error("i/o failure accessing fss snapshot at {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o failure reading or writing fss wire data")]
    Wire(#[source] std::io::Error),

    #[error("fss snapshot at {path} was written by format version {found}, expected {expected}")]
    VersionMismatch {
        path: Utf8PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("truncated fss snapshot: expected {what}")]
    Truncated { what: &'static str },

    #[error("snapshot string is not valid utf-8")]
    InvalidUtf8,

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type FssResult<T> = Result<T, FssError>;
