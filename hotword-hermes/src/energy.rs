/// Energy-based reference detector
///
/// Fires when speech-like energy is sustained for a fixed number of chunks.
/// It knows nothing about the actual phrase; it exists so the service runs
/// end-to-end without a native wake-word SDK, and as a template for real
/// backends.

use crate::detector::{Classification, Detector, DetectorError};
use std::path::Path;
use tracing::{debug, trace};

/// Energy-detector tuning
#[derive(Debug, Clone)]
pub struct EnergyConfig {
    /// RMS threshold at sensitivity 0.5 (0.0 - 1.0)
    pub energy_threshold: f32,

    /// Zero-crossing rate required when the frontend is enabled
    pub zcr_threshold: f32,

    /// RMS below this is reported as silence
    pub silence_floor: f32,

    /// Consecutive speech chunks needed to fire
    pub trigger_chunks: usize,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            zcr_threshold: 0.01,
            silence_floor: 0.001,
            trigger_chunks: 10, // 300ms of 30ms chunks
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerState {
    Idle,
    Rising(usize),
    /// Fired; waits for a non-speech chunk before arming again
    Fired,
}

/// Reference `Detector` backed by frame energy
#[derive(Debug)]
pub struct EnergyDetector {
    config: EnergyConfig,
    configured: bool,
    threshold: f32,
    gain: f32,
    frontend: bool,
    state: TriggerState,
}

impl EnergyDetector {
    pub fn new() -> Self {
        Self::with_config(EnergyConfig::default())
    }

    pub fn with_config(config: EnergyConfig) -> Self {
        Self {
            threshold: config.energy_threshold,
            config,
            configured: false,
            gain: 1.0,
            frontend: false,
            state: TriggerState::Idle,
        }
    }

    /// Effective RMS threshold after sensitivity is applied
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn decode(&self, chunk: &[u8]) -> Vec<f32> {
        chunk
            .chunks_exact(2)
            .map(|b| {
                let sample = i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32;
                (sample * self.gain).clamp(-1.0, 1.0)
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_squares / samples.len() as f64).sqrt() as f32
    }

    fn zero_crossing_rate(samples: &[f32]) -> f32 {
        if samples.len() < 2 {
            return 0.0;
        }

        let crossings = samples
            .windows(2)
            .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
            .count();

        crossings as f32 / (samples.len() - 1) as f32
    }

    fn advance(&mut self, is_speech: bool) -> Classification {
        self.state = match (self.state, is_speech) {
            (_, false) => TriggerState::Idle,
            (TriggerState::Fired, true) => TriggerState::Fired,
            (TriggerState::Idle, true) => TriggerState::Rising(1),
            (TriggerState::Rising(count), true) => TriggerState::Rising(count + 1),
        };

        if let TriggerState::Rising(count) = self.state {
            if count >= self.config.trigger_chunks {
                debug!("Energy detector fired after {} chunk(s)", count);
                self.state = TriggerState::Fired;
                return Classification::Match(1);
            }
        }

        Classification::NoMatch
    }
}

impl Default for EnergyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for EnergyDetector {
    fn configure(&mut self, _resource_path: &Path, model_path: &Path) -> Result<(), DetectorError> {
        if !model_path.is_file() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        self.configured = true;
        self.state = TriggerState::Idle;
        Ok(())
    }

    fn set_sensitivity(&mut self, sensitivity: &str) -> Result<(), DetectorError> {
        // Multi-keyword models list one value per keyword; the first one applies
        let first = sensitivity.split(',').next().unwrap_or_default().trim();
        let value: f32 = first
            .parse()
            .map_err(|_| DetectorError::InvalidSensitivity(sensitivity.to_string()))?;

        if !(0.0..=1.0).contains(&value) {
            return Err(DetectorError::InvalidSensitivity(sensitivity.to_string()));
        }

        self.threshold = self.config.energy_threshold * (1.5 - value);
        Ok(())
    }

    fn set_audio_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn set_frontend(&mut self, apply: bool) {
        self.frontend = apply;
    }

    fn run_detection(&mut self, chunk: &[u8]) -> Classification {
        if !self.configured || chunk.len() % 2 != 0 {
            return Classification::Error;
        }

        let samples = self.decode(chunk);
        let energy = Self::rms(&samples);

        if energy < self.config.silence_floor {
            self.state = TriggerState::Idle;
            return Classification::Silence;
        }

        let zcr = Self::zero_crossing_rate(&samples);
        let is_speech =
            energy > self.threshold && (!self.frontend || zcr > self.config.zcr_threshold);

        trace!(
            "Chunk analysis: energy={:.4}, zcr={:.4}, speech={}",
            energy, zcr, is_speech
        );

        self.advance(is_speech)
    }
}
