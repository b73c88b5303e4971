/// Wake-word detector pool
///
/// Holds one detector instance per configured model and runs every audio
/// chunk through them in configured order. The first detector that fires
/// wins the chunk; its positional wake-word id and model metadata become a
/// `HotwordDetected` event.

use crate::messages::{HotwordDetected, HotwordError, HotwordEvent, DEFAULT_WAKEWORD_ID, MODEL_TYPE};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

/// Default detector sensitivity
pub const DEFAULT_SENSITIVITY: &str = "0.5";

/// Default audio gain
pub const DEFAULT_AUDIO_GAIN: f32 = 1.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Missing {0}")]
    ModelNotFound(String),

    #[error("Invalid sensitivity: {0}")]
    InvalidSensitivity(String),

    #[error("Detector initialization failed: {0}")]
    Init(String),

    #[error("Missing {0} in models")]
    MissingModel(usize),

    #[error("No model id in {0}")]
    InvalidModelId(String),
}

/// Per-chunk detector verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No audio energy at all
    Silence,
    /// The detector could not process the chunk
    Error,
    /// Voice, but not the hotword
    NoMatch,
    /// Hotword detected (1-based keyword index inside the model)
    Match(u32),
}

impl Classification {
    /// Map a native result code (-2 silence, -1 error, 0 voice, n > 0 keyword n)
    pub fn from_code(code: i32) -> Self {
        match code {
            -2 => Self::Silence,
            0 => Self::NoMatch,
            n if n > 0 => Self::Match(n.unsigned_abs()),
            _ => Self::Error,
        }
    }
}

/// Wake-word detector backend
///
/// One instance is created per model. Instances are stateful: chunks must be
/// fed in arrival order.
#[cfg_attr(test, mockall::automock)]
pub trait Detector: Send {
    /// Load the model (and any shared resource file)
    fn configure(&mut self, resource_path: &Path, model_path: &Path) -> Result<(), DetectorError>;

    fn set_sensitivity(&mut self, sensitivity: &str) -> Result<(), DetectorError>;

    fn set_audio_gain(&mut self, gain: f32);

    fn set_frontend(&mut self, apply: bool);

    /// Classify one chunk of raw PCM
    fn run_detection(&mut self, chunk: &[u8]) -> Classification;
}

/// Settings for a single wake-word model
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub model_path: PathBuf,
    pub sensitivity: String,
    pub audio_gain: f32,
    pub apply_frontend: bool,
}

impl Model {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            sensitivity: DEFAULT_SENSITIVITY.to_string(),
            audio_gain: DEFAULT_AUDIO_GAIN,
            apply_frontend: false,
        }
    }

    /// Model id reported in detections (file name without extension)
    pub fn model_id(&self) -> Result<String, DetectorError> {
        self.model_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| DetectorError::InvalidModelId(self.model_path.display().to_string()))
    }
}

/// A model paired with the wake-word id it reports
#[derive(Debug, Clone, PartialEq)]
pub struct WakewordBinding {
    pub model: Model,
    pub wakeword_id: String,
}

impl WakewordBinding {
    /// Pair models with ids by position; models without an id get "default"
    pub fn bind_all(models: Vec<Model>, wakeword_ids: &[String]) -> Vec<Self> {
        models
            .into_iter()
            .enumerate()
            .map(|(index, model)| Self {
                model,
                wakeword_id: wakeword_ids
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_WAKEWORD_ID.to_string()),
            })
            .collect()
    }
}

struct PoolEntry {
    binding: WakewordBinding,
    detector: Box<dyn Detector>,
}

/// Ordered set of detectors sharing one audio stream
pub struct DetectorPool {
    entries: Vec<PoolEntry>,
    chunks_processed: u64,
    detections: u64,
}

impl DetectorPool {
    /// Create and configure one detector per binding
    ///
    /// Every model file must exist. `factory` is called once per binding,
    /// in order.
    pub fn load<F>(
        bindings: Vec<WakewordBinding>,
        resource_path: &Path,
        mut factory: F,
    ) -> Result<Self, DetectorError>
    where
        F: FnMut() -> Box<dyn Detector>,
    {
        let mut detectors = Vec::with_capacity(bindings.len());

        for binding in &bindings {
            let model = &binding.model;
            if !model.model_path.is_file() {
                return Err(DetectorError::ModelNotFound(
                    model.model_path.display().to_string(),
                ));
            }

            debug!("Loading model: {:?}", model);

            let mut detector = factory();
            detector.configure(resource_path, &model.model_path)?;
            detector.set_sensitivity(&model.sensitivity)?;
            detector.set_audio_gain(model.audio_gain);
            detector.set_frontend(model.apply_frontend);

            detectors.push(detector);
        }

        let pool = Self::from_parts(bindings, detectors)?;
        info!("Loaded {} wake-word model(s)", pool.len());
        Ok(pool)
    }

    /// Assemble a pool from already configured detectors
    pub fn from_parts(
        bindings: Vec<WakewordBinding>,
        detectors: Vec<Box<dyn Detector>>,
    ) -> Result<Self, DetectorError> {
        if bindings.len() != detectors.len() {
            return Err(DetectorError::Init(format!(
                "{} binding(s) but {} detector(s)",
                bindings.len(),
                detectors.len()
            )));
        }

        let entries = bindings
            .into_iter()
            .zip(detectors)
            .map(|(binding, detector)| PoolEntry { binding, detector })
            .collect();

        Ok(Self {
            entries,
            chunks_processed: 0,
            detections: 0,
        })
    }

    /// Run one chunk through the detectors
    ///
    /// Stops at the first detector that matches and returns its event.
    /// Detectors after it are not invoked for this chunk.
    pub fn run(&mut self, chunk: &[u8], site_id: &str) -> Option<HotwordEvent> {
        self.chunks_processed += 1;

        let mut matched = None;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            match entry.detector.run_detection(chunk) {
                Classification::Match(keyword) => {
                    debug!("Detector {} fired (keyword {})", index, keyword);
                    matched = Some(index);
                    break;
                }
                Classification::Error => {
                    debug!("Detector {} failed on chunk", index);
                }
                Classification::Silence | Classification::NoMatch => {}
            }
        }

        let index = matched?;
        self.detections += 1;
        Some(self.handle_detection(index, site_id))
    }

    /// Build the event for a detection at `index`
    fn handle_detection(&self, index: usize, site_id: &str) -> HotwordEvent {
        match self.detection_message(index, site_id) {
            Ok((wakeword_id, message)) => HotwordEvent::Detected {
                wakeword_id,
                message,
            },
            Err(e) => {
                error!("handle_detection: {}", e);
                HotwordEvent::Error(HotwordError {
                    error: e.to_string(),
                    context: index.to_string(),
                    site_id: site_id.to_string(),
                })
            }
        }
    }

    fn detection_message(
        &self,
        index: usize,
        site_id: &str,
    ) -> Result<(String, HotwordDetected), DetectorError> {
        let binding = &self
            .entries
            .get(index)
            .ok_or(DetectorError::MissingModel(index))?
            .binding;

        let message = HotwordDetected {
            site_id: site_id.to_string(),
            model_id: binding.model.model_id()?,
            current_sensitivity: binding.model.sensitivity.clone(),
            model_version: String::new(),
            model_type: MODEL_TYPE.to_string(),
        };

        Ok((binding.wakeword_id.clone(), message))
    }

    /// Bindings in configured order
    pub fn bindings(&self) -> impl Iterator<Item = &WakewordBinding> {
        self.entries.iter().map(|entry| &entry.binding)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get current statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            detectors: self.entries.len(),
            chunks_processed: self.chunks_processed,
            detections: self.detections,
        }
    }
}

/// Detector pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub detectors: usize,
    pub chunks_processed: u64,
    pub detections: u64,
}
