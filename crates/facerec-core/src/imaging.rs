//! Image file decoding.

use image::{ImageReader, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("cannot open image {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode image {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {0} has zero width or height")]
    Empty(PathBuf),
}

/// Open and decode an image file into 8-bit RGB.
///
/// The format is guessed from the file contents, so a PNG saved with a
/// `.jpg` extension still decodes.
pub fn load_rgb(path: &Path) -> Result<RgbImage, ImageError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|source| ImageError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let decoded = reader.decode().map_err(|source| ImageError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(ImageError::Empty(path.to_path_buf()));
    }

    tracing::debug!(
        path = %path.display(),
        width = rgb.width(),
        height = rgb.height(),
        "image decoded"
    );

    Ok(rgb)
}
