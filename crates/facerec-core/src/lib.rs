//! Face detection and embedding engine.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings,
//! both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod config;
pub mod detector;
pub mod imaging;
pub mod pipeline;
pub mod recognizer;
pub mod report;
pub mod types;

pub use config::{default_model_dir, Config, ConfigError};
pub use detector::FaceDetector;
pub use imaging::ImageError;
pub use pipeline::{recognize_face, PipelineError, Recognizer};
pub use recognizer::FaceRecognizer;
pub use report::Report;
pub use types::{BoundingBox, Embedding, FaceSelection};
