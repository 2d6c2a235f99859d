//! Image path → optional embedding.
//!
//! Load image, detect faces, pick one, embed it. Finding no face is a normal
//! outcome (`Ok(None)`), not an error.

use crate::config::Config;
use crate::detector::{DetectorError, FaceDetector};
use crate::imaging::{self, ImageError};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding, FaceSelection};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("face detection failed")]
    Detector(#[from] DetectorError),
    #[error("face embedding failed")]
    Recognizer(#[from] RecognizerError),
}

/// Locates faces in an image.
pub trait Detect {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Computes the embedding of one located face.
pub trait Embed {
    fn embed(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError>;
}

impl Detect for FaceDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        FaceDetector::detect(self, image)
    }
}

impl Embed for FaceRecognizer {
    fn embed(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        self.extract(image, face)
    }
}

/// Detector + recognizer pair with a face selection policy.
pub struct Recognizer<D = FaceDetector, E = FaceRecognizer> {
    detector: D,
    embedder: E,
    selection: FaceSelection,
}

impl Recognizer {
    /// Load both ONNX models named by `config`. Fails fast if either is missing.
    pub fn load(config: &Config) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(
            &config.detector_model_path(),
            config.confidence_threshold,
            config.intra_threads,
        )?;
        let embedder =
            FaceRecognizer::load(&config.recognizer_model_path(), config.intra_threads)?;

        tracing::info!(selection = %config.face_selection, "recognizer ready");
        Ok(Self::new(detector, embedder, config.face_selection))
    }
}

impl<D: Detect, E: Embed> Recognizer<D, E> {
    pub fn new(detector: D, embedder: E, selection: FaceSelection) -> Self {
        Self {
            detector,
            embedder,
            selection,
        }
    }

    /// Embed one face of an already decoded image, or `None` if there is no face.
    pub fn recognize_image(
        &mut self,
        image: &RgbImage,
    ) -> Result<Option<Embedding>, PipelineError> {
        let faces = self.detector.detect(image)?;
        tracing::info!(faces = faces.len(), "faces detected");

        let Some(face) = self.selection.select(&faces) else {
            return Ok(None);
        };

        tracing::debug!(
            x = face.x,
            y = face.y,
            width = face.width,
            height = face.height,
            confidence = face.confidence,
            selection = %self.selection,
            "face selected"
        );

        let embedding = self.embedder.embed(image, face)?;
        tracing::info!(dim = embedding.len(), "embedding computed");
        Ok(Some(embedding))
    }

    /// Decode the image at `path` and embed one face of it.
    pub fn recognize_path(&mut self, path: &Path) -> Result<Option<Embedding>, PipelineError> {
        let image = imaging::load_rgb(path)?;
        self.recognize_image(&image)
    }
}

/// One-shot helper: decode the image, load the models, embed the selected face.
///
/// The image is decoded before the models are loaded so a bad input path is
/// reported without touching ONNX Runtime.
pub fn recognize_face(path: &Path, config: &Config) -> Result<Option<Embedding>, PipelineError> {
    let image = imaging::load_rgb(path)?;
    let mut recognizer = Recognizer::load(config)?;
    recognizer.recognize_image(&image)
}
