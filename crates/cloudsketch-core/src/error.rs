use std::path::PathBuf;

use thiserror::Error;

/// Failures at the edges of the core: decoding sketches and committing edits.
///
/// Connection rejections during validation are not errors; they come back as
/// [`crate::ConnectionCheck`]. Only [`crate::Sketch::connect`] turns a rejection
/// into [`SketchError::ConnectionRejected`] because it was asked to commit.
#[derive(Debug, Error)]
pub enum SketchError {
    #[error("invalid sketch JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown component type '{0}'")]
    UnknownType(String),

    #[error("component '{0}' not found")]
    ComponentNotFound(String),

    #[error("field '{0}' cannot be changed after creation")]
    ImmutableField(String),

    #[error("connection rejected: {0}")]
    ConnectionRejected(String),
}

pub type Result<T> = std::result::Result<T, SketchError>;
