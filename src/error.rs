use std::path::PathBuf;

/// Errors raised by the loaders, stores and geometry builders.
///
/// Application code wraps these in `anyhow::Error` with extra context; the
/// variants stay matchable for callers that need to tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Usage(String),

    #[error("Could not open file '{}'", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    FileFormat(String),

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("{}:{line}: malformed filter expression '{text}': {reason}", path.display())]
    MalformedExpression {
        path: PathBuf,
        line: u64,
        text: String,
        reason: String,
    },

    #[error("{0}")]
    Geometry(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Unknown location store '{name}' (available: {available})")]
    UnknownLocationStore { name: String, available: String },

    #[error("Unknown output format '{name}' (available: {available})")]
    UnknownFormat { name: String, available: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
