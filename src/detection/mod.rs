//! Face detector abstraction
//!
//! A [`FaceDetector`] turns one image into a list of [`FaceDetection`]s. The
//! batch layer never shares a detector between threads: every worker builds
//! its own instance through the [`DetectorRegistry`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod command;
pub mod registry;

pub use command::CommandDetector;
pub use registry::{DetectorConstructor, DetectorRegistry};

/// Axis-aligned face box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    /// Detector confidence in `[0, 1]`
    pub confidence: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence) && self.x2 >= self.x1 && self.y2 >= self.y1
    }
}

/// A single detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    #[serde(flatten)]
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<[f64; 2]>>,
}

impl FaceDetection {
    pub fn new(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            landmarks: None,
        }
    }
}

/// Everything a detector needs to process one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionRequest {
    pub image_path: PathBuf,
    /// Write an annotated copy of the image into `output_folder`
    pub save_annotated: bool,
    pub output_folder: PathBuf,
}

impl DetectionRequest {
    pub fn new(image_path: impl Into<PathBuf>, output_folder: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            save_annotated: false,
            output_folder: output_folder.into(),
        }
    }

    pub fn with_annotation(mut self, save_annotated: bool) -> Self {
        self.save_annotated = save_annotated;
        self
    }

    /// File name of the image, used to tag its records
    pub fn image_name(&self) -> String {
        image_name(&self.image_path)
    }
}

/// A model able to find faces in an image
///
/// Implementations may hold heavyweight, non-shareable resources. They must
/// be `Send` so a worker can own one, but are never required to be `Sync`.
pub trait FaceDetector {
    fn detect(&mut self, request: &DetectionRequest) -> anyhow::Result<Vec<FaceDetection>>;
}

/// Flat, serializable row of the consolidated output
///
/// Field order is the column order of the CSV projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub image_name: String,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub confidence: f64,
}

impl DetectionRecord {
    pub fn new(image_name: impl Into<String>, detection: &FaceDetection) -> Self {
        let bbox = detection.bbox;
        Self {
            image_name: image_name.into(),
            x1: bbox.x1,
            y1: bbox.y1,
            x2: bbox.x2,
            y2: bbox.y2,
            confidence: bbox.confidence,
        }
    }

    /// Tag every detection of one image with that image's name
    pub fn from_detections(image_name: &str, detections: &[FaceDetection]) -> Vec<Self> {
        detections
            .iter()
            .map(|detection| Self::new(image_name, detection))
            .collect()
    }
}

pub(crate) fn image_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
