//! Folder detection orchestrator
//!
//! Lists the images of one directory, picks sequential or parallel execution
//! for the requested model, runs the batch (falling back to a sequential
//! re-run if the worker pool fails) and aggregates everything into a
//! [`FolderReport`].

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::BatchSettings;
use crate::detection::{
    DetectionRecord, DetectionRequest, DetectorConstructor, DetectorRegistry, FaceDetection,
    FaceDetector,
};
use crate::error::{BatchError, ConfigurationError, DetectError};
use crate::parallel::core::panic_message;
use crate::parallel::{
    BatchExecutor, BatchOptions, PoolConfig, ProgressObserver, SilentProgress, StartMethod,
};
use crate::reports;

pub mod plan;
pub mod types;

pub use plan::{ExecutionMode, ExecutionPlan, Fallback};
pub use types::{FolderReport, ItemDetections};
use types::ItemOutcome;

/// Parameters of one `detect_folder` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRequest {
    pub directory: PathBuf,
    pub output_root: PathBuf,
    pub save_consolidated: bool,
    pub consolidated_path: PathBuf,
    /// Ask the detector for annotated images under `output_root/<image stem>/`
    pub save_per_item_artifacts: bool,
    /// `Some(0)` runs sequentially, `None` sizes the pool from configuration
    pub worker_count: Option<usize>,
    pub allowed_extensions: Vec<String>,
    pub model: String,
}

impl FolderRequest {
    pub fn new(directory: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        let defaults = BatchSettings::default();
        Self {
            directory: directory.into(),
            output_root: defaults.output_folder,
            save_consolidated: true,
            consolidated_path: defaults.consolidated_path,
            save_per_item_artifacts: false,
            worker_count: Some(0),
            allowed_extensions: defaults.extensions,
            model: model.into(),
        }
    }

    /// Request using the folders, extensions and model of `settings`
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            directory: settings.images_folder.clone(),
            output_root: settings.output_folder.clone(),
            save_consolidated: true,
            consolidated_path: settings.consolidated_path.clone(),
            save_per_item_artifacts: false,
            worker_count: Some(0),
            allowed_extensions: settings.extensions.clone(),
            model: settings.default_model.clone(),
        }
    }

    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    /// Write the consolidated JSON to `path`
    pub fn with_consolidated_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_consolidated = true;
        self.consolidated_path = path.into();
        self
    }

    pub fn without_consolidated_output(mut self) -> Self {
        self.save_consolidated = false;
        self
    }

    pub fn with_per_item_artifacts(mut self, save: bool) -> Self {
        self.save_per_item_artifacts = save;
        self
    }

    pub fn with_worker_count(mut self, worker_count: Option<usize>) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }
}

/// Plain parameters shared by every item of a run
#[derive(Debug, Clone)]
struct ItemJob {
    directory: PathBuf,
    output_root: PathBuf,
    save_annotated: bool,
}

impl ItemJob {
    fn request_for(&self, image_name: &str) -> DetectionRequest {
        let output_folder = if self.save_annotated {
            let stem = Path::new(image_name)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| image_name.to_string());
            self.output_root.join(stem)
        } else {
            self.output_root.clone()
        };

        DetectionRequest::new(self.directory.join(image_name), output_folder)
            .with_annotation(self.save_annotated)
    }
}

type Detector = Box<dyn FaceDetector + Send>;

/// Runs face detection over whole folders
pub struct FolderDetector {
    registry: DetectorRegistry,
    settings: BatchSettings,
    progress: Arc<dyn ProgressObserver>,
}

impl FolderDetector {
    pub fn new(registry: DetectorRegistry, settings: BatchSettings) -> Self {
        Self {
            registry,
            settings,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    /// Detect faces in every matching image of `request.directory`
    pub fn detect_folder(&self, request: &FolderRequest) -> Result<FolderReport, DetectError> {
        validate_directory(&request.directory)?;
        let constructor = self.registry.constructor(&request.model)?;
        let images = collect_images(&request.directory, &request.allowed_extensions)?;

        info!("Found {} images to process", images.len());

        let (plan, mut fallback) = ExecutionPlan::select(
            &request.model,
            request.worker_count,
            self.registry.is_parallel_unsafe(&request.model),
            self.settings.optimal_workers(),
        );
        if let Some(reason) = &fallback {
            warn!("{reason}");
        }

        let job = ItemJob {
            directory: request.directory.clone(),
            output_root: request.output_root.clone(),
            save_annotated: request.save_per_item_artifacts,
        };

        let (plan, outcomes) = if plan.is_parallel() {
            info!("Attempting parallel processing with {} workers", plan.worker_count);
            match self.run(&plan, &constructor, &job, images.clone()) {
                Ok(outcomes) => (plan, outcomes),
                Err(error) => {
                    warn!(
                        "Parallel processing failed: {error}. \
                         Falling back to sequential processing"
                    );
                    fallback = Some(Fallback::PoolFailure {
                        error: error.to_string(),
                    });
                    let sequential = ExecutionPlan::sequential();
                    let outcomes = self.run_sequential(
                        &sequential,
                        &request.model,
                        &constructor,
                        &job,
                        images.clone(),
                    )?;
                    (sequential, outcomes)
                }
            }
        } else {
            info!("Using sequential processing");
            let outcomes =
                self.run_sequential(&plan, &request.model, &constructor, &job, images.clone())?;
            (plan, outcomes)
        };

        let mut report = FolderReport::aggregate(outcomes, images.len(), plan, fallback);
        info!(
            "Processed {} images: {} detections, {} failures",
            report.items_attempted,
            report.total_detections(),
            report.failures.len()
        );

        if request.save_consolidated {
            let written = reports::write_records(&report.records(), &request.consolidated_path);
            if let Err(error) = written {
                return Err(DetectError::Sink {
                    error,
                    report: Box::new(report),
                });
            }
            info!("Saved detections to {}", request.consolidated_path.display());
            report.consolidated_path = Some(request.consolidated_path.clone());
        }

        Ok(report)
    }

    /// Detect faces in a single image with a freshly constructed detector
    pub fn detect_image(
        &self,
        model: &str,
        request: &DetectionRequest,
    ) -> Result<Vec<FaceDetection>, DetectError> {
        let constructor = self.registry.constructor(model)?;
        let mut detector = constructor().map_err(|source| DetectError::Detector {
            model: model.to_string(),
            source,
        })?;
        detector
            .detect(request)
            .and_then(|detections| check_boxes(&detections).map(|()| detections))
            .map_err(|source| DetectError::Detector {
                model: model.to_string(),
                source,
            })
    }

    fn run_sequential(
        &self,
        plan: &ExecutionPlan,
        model: &str,
        constructor: &DetectorConstructor,
        job: &ItemJob,
        images: Vec<String>,
    ) -> Result<Vec<ItemOutcome>, DetectError> {
        self.run(plan, constructor, job, images).map_err(|error| match error {
            BatchError::Initializer(message) => DetectError::Detector {
                model: model.to_string(),
                source: anyhow::anyhow!(message),
            },
            other => DetectError::Batch(other),
        })
    }

    fn run(
        &self,
        plan: &ExecutionPlan,
        constructor: &DetectorConstructor,
        job: &ItemJob,
        images: Vec<String>,
    ) -> Result<Vec<ItemOutcome>, BatchError> {
        // Detectors are always built on the worker thread that uses them
        let pool = PoolConfig::new(plan.strategy())
            .with_start_method(StartMethod::Spawn)
            .with_buffer_multiplier(self.settings.buffer_multiplier);
        let executor = BatchExecutor::new(pool).with_progress(self.progress.clone());
        let options = BatchOptions::new("Detecting faces").preserve_order(plan.preserve_order);

        let constructor = constructor.clone();
        let job = job.clone();

        executor
            .process(
                images,
                move || constructor(),
                move |detector: &mut Detector, image_name: String| {
                    detect_item(detector, &job, image_name)
                },
                &options,
            )?
            .into_vec()
    }
}

/// Run one image through the detector inside its own failure boundary
fn detect_item(detector: &mut Detector, job: &ItemJob, image_name: String) -> ItemOutcome {
    let request = job.request_for(&image_name);

    let result = match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&request))) {
        Ok(Ok(detections)) => match check_boxes(&detections) {
            Ok(()) => {
                debug!("{image_name}: {} faces", detections.len());
                Ok(DetectionRecord::from_detections(&image_name, &detections))
            }
            Err(e) => Err(format!("{e:#}")),
        },
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(format!("detector panicked: {}", panic_message(payload.as_ref()))),
    };

    if let Err(error) = &result {
        warn!("Error processing {image_name}: {error}");
    }

    ItemOutcome { image_name, result }
}

/// Confidence must lie in `[0, 1]` and boxes must not be inverted
fn check_boxes(detections: &[FaceDetection]) -> anyhow::Result<()> {
    match detections.iter().find(|detection| !detection.bbox.is_valid()) {
        Some(invalid) => anyhow::bail!("detector returned an invalid box {:?}", invalid.bbox),
        None => Ok(()),
    }
}

fn validate_directory(directory: &Path) -> Result<(), ConfigurationError> {
    if !directory.exists() {
        return Err(ConfigurationError::MissingDirectory(directory.to_path_buf()));
    }
    if !directory.is_dir() {
        return Err(ConfigurationError::NotADirectory(directory.to_path_buf()));
    }
    Ok(())
}

/// Sorted names of the regular files directly inside `directory` whose
/// extension is one of `extensions`
pub fn list_images(
    directory: &Path,
    extensions: &[String],
) -> Result<Vec<String>, ConfigurationError> {
    validate_directory(directory)?;
    collect_images(directory, extensions)
}

/// Listing of a directory that is already known to exist
fn collect_images(
    directory: &Path,
    extensions: &[String],
) -> Result<Vec<String>, ConfigurationError> {
    let unreadable = |source| ConfigurationError::Unreadable {
        path: directory.to_path_buf(),
        source,
    };

    let mut images = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            debug!("Skipping non UTF-8 file name {}", path.display());
            continue;
        };
        if has_allowed_extension(name, extensions) {
            images.push(name.to_string());
        }
    }

    if images.is_empty() {
        return Err(ConfigurationError::NoMatchingFiles {
            directory: directory.to_path_buf(),
            extensions: extensions.to_vec(),
        });
    }

    images.sort();
    Ok(images)
}

/// Case-insensitive suffix match; the leading dot of an extension is optional
pub fn has_allowed_extension(name: &str, extensions: &[String]) -> bool {
    let name = name.to_lowercase();
    extensions.iter().any(|ext| {
        let ext = ext.trim_start_matches('.').to_lowercase();
        !ext.is_empty() && name.ends_with(&format!(".{ext}"))
    })
}
