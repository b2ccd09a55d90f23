use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use super::{CommandDetector, FaceDetector};
use crate::config::Settings;
use crate::error::ConfigurationError;

/// Builds a fresh, unshared detector instance
pub type DetectorConstructor =
    Arc<dyn Fn() -> Result<Box<dyn FaceDetector + Send>> + Send + Sync>;

/// Model name to detector constructor table
///
/// Cheap to clone; worker threads receive their own clone and construct a
/// private detector from it.
#[derive(Clone)]
pub struct DetectorRegistry {
    constructors: BTreeMap<String, DetectorConstructor>,
    parallel_unsafe: BTreeSet<String>,
}

impl DetectorRegistry {
    /// Empty registry; `mediapipe` is the only model flagged parallel-unsafe
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
            parallel_unsafe: BTreeSet::from(["mediapipe".to_string()]),
        }
    }

    /// Registry of command-backed detectors declared in configuration
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new().with_parallel_unsafe(settings.batch.parallel_unsafe.iter());

        for (name, model) in &settings.models {
            let detector = CommandDetector::new(name.clone(), model.command.clone());
            registry.register(name.clone(), move || {
                Ok(Box::new(detector.clone()) as Box<dyn FaceDetector + Send>)
            });
        }

        registry
    }

    /// Register (or replace) a model
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn FaceDetector + Send>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    pub fn with_detector<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Result<Box<dyn FaceDetector + Send>> + Send + Sync + 'static,
    {
        self.register(name, constructor);
        self
    }

    /// Replace the parallel-unsafe set
    pub fn with_parallel_unsafe<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parallel_unsafe = models
            .into_iter()
            .map(|model| model.as_ref().to_lowercase())
            .collect();
        self
    }

    /// Whether the model must run on a single worker (case-insensitive)
    pub fn is_parallel_unsafe(&self, model: &str) -> bool {
        self.parallel_unsafe.contains(&model.to_lowercase())
    }

    pub fn contains(&self, model: &str) -> bool {
        self.constructors.contains_key(model)
    }

    /// Sorted names of every registered model
    pub fn list_available_models(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Constructor for `model`, or the unknown-model error
    pub fn constructor(&self, model: &str) -> Result<DetectorConstructor, ConfigurationError> {
        self.constructors
            .get(model)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownModel {
                model: model.to_string(),
                available: self.list_available_models(),
            })
    }

    /// Construct a new detector instance for `model`
    pub fn create(&self, model: &str) -> Result<Box<dyn FaceDetector + Send>> {
        let constructor = self.constructor(model)?;
        constructor()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("models", &self.list_available_models())
            .field("parallel_unsafe", &self.parallel_unsafe)
            .finish()
    }
}
