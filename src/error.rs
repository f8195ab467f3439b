use std::path::PathBuf;

/// Failures reading a scraped input file. Any of these aborts the run before
/// output is written.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("input file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("document does not start with a JSON array")]
    NotAnArray,

    #[error("could not recover a complete array: {0}")]
    Unrecoverable(String),
}
