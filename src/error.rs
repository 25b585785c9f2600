use std::path::PathBuf;

use thiserror::Error;

use crate::BoundingBox;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("annotation not found: {}", .0.display())]
    AnnotationNotFound(PathBuf),

    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("malformed annotation {}: {reason}", .path.display())]
    MalformedAnnotation { path: PathBuf, reason: String },

    #[error("invalid bounding box {bbox:?} for {width}x{height} image")]
    InvalidBoundingBox {
        bbox: BoundingBox,
        width: u32,
        height: u32,
    },

    #[error("unsupported source image: {0}")]
    InvalidImage(String),

    #[error("failed to load recognition model: {0}")]
    ModelLoadFailure(String),

    /// The predicted sequence never emitted the end marker.
    #[error("predicted sequence of length {len} has no end marker")]
    MissingEndMarker { len: usize },

    #[error("symbol is not part of the vocabulary: {0}")]
    UnknownSymbol(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ort(#[from] ort::Error),
}

impl Error {
    /// Errors that concern a single region rather than the whole call.
    pub fn is_region_local(&self) -> bool {
        matches!(
            self,
            Error::InvalidBoundingBox { .. }
                | Error::MissingEndMarker { .. }
                | Error::UnknownSymbol(_)
        )
    }
}
