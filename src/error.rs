// Error types for image loading
// Runtime load failures never reach the user; they are logged and dropped

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognised image format")]
    UnknownFormat(#[source] image::ImageError),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image data is empty")]
    Empty,

    #[error("Not a local file URI: {0}")]
    NotAFileUri(String),

    #[error("Drop payload contained no URI")]
    NoUri,

    #[error("Load was cancelled")]
    Cancelled,
}

pub type LoadResult<T> = std::result::Result<T, LoadError>;
