/// Service configuration
///
/// Command-line flags are parsed with clap and turned into a validated
/// `ServiceConfig`.

use crate::detector::{Model, WakewordBinding};
use crate::frame_buffer::DEFAULT_CHUNK_SIZE;
use crate::normalizer::{
    AudioFormat, DEFAULT_CHANNELS, DEFAULT_CONVERTER, DEFAULT_SAMPLE_RATE, DEFAULT_SAMPLE_WIDTH,
};
use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MQTT_HOST: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("At least one --model is required")]
    NoModels,

    #[error("Invalid model settings {settings:?}: {message}")]
    InvalidModel {
        settings: Vec<String>,
        message: String,
    },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Command-line interface
#[derive(Parser, Debug, Clone)]
#[command(name = "hotword-hermes")]
#[command(about = "Hermes MQTT hotword service", long_about = None)]
pub struct Cli {
    /// Model settings: path [sensitivity] [audio_gain] [apply_frontend]
    #[arg(
        long,
        required = true,
        num_args = 1..=4,
        action = ArgAction::Append,
        value_names = ["PATH", "SENSITIVITY", "AUDIO_GAIN", "APPLY_FRONTEND"]
    )]
    pub model: Vec<String>,

    /// `--model` values grouped per occurrence
    #[arg(skip)]
    pub model_groups: Vec<Vec<String>>,

    /// Wake-word id of each model, in model order (default: default)
    #[arg(long = "wakeword-id", alias = "wakewordId")]
    pub wakeword_id: Vec<String>,

    /// Read WAV audio from stdin, print detections and exit
    #[arg(long)]
    pub stdin_audio: bool,

    /// MQTT host
    #[arg(long, default_value = DEFAULT_MQTT_HOST)]
    pub host: String,

    /// MQTT port
    #[arg(long, default_value_t = DEFAULT_MQTT_PORT)]
    pub port: u16,

    /// MQTT username
    #[arg(long)]
    pub username: Option<String>,

    /// MQTT password
    #[arg(long)]
    pub password: Option<String>,

    /// Hermes site id(s) to listen for (default: all)
    #[arg(long = "site-id", alias = "siteId")]
    pub site_id: Vec<String>,

    /// Shared detector resource file
    #[arg(long)]
    pub resource: Option<PathBuf>,

    /// Sample rate expected by the detectors (Hz)
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Sample width expected by the detectors (bytes)
    #[arg(long, default_value_t = DEFAULT_SAMPLE_WIDTH)]
    pub sample_width: u16,

    /// Channel count expected by the detectors
    #[arg(long, default_value_t = DEFAULT_CHANNELS)]
    pub channels: u16,

    /// Bytes of audio per detector call
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Program used to convert audio (sox-compatible arguments)
    #[arg(long, default_value = DEFAULT_CONVERTER)]
    pub converter: String,

    /// Start with detection disabled until a toggleOn arrives
    #[arg(long)]
    pub disabled: bool,

    /// Print DEBUG messages to the console
    #[arg(long)]
    pub debug: bool,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MQTT_HOST.to_string(),
            port: DEFAULT_MQTT_PORT,
            username: None,
            password: None,
            client_id: format!("hotword-hermes-{}", std::process::id()),
        }
    }
}

/// Configuration for the hotword service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Models with their wake-word ids, in detection order
    pub bindings: Vec<WakewordBinding>,

    /// Site scope (empty = all sites)
    pub site_ids: Vec<String>,

    /// Initial enabled state for every site
    pub enabled: bool,

    /// PCM format fed to the detectors
    pub format: AudioFormat,

    /// Bytes per detector chunk
    pub chunk_size: usize,

    /// Shared detector resource file
    pub resource_path: PathBuf,

    /// External audio converter
    pub converter: String,

    pub mqtt: MqttConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
            site_ids: Vec::new(),
            enabled: true,
            format: AudioFormat::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            resource_path: PathBuf::new(),
            converter: DEFAULT_CONVERTER.to_string(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bindings.is_empty() {
            return Err(ConfigError::NoModels);
        }

        let positive = [
            ("sample_rate", self.format.sample_rate as usize),
            ("sample_width", self.format.sample_width as usize),
            ("channels", self.format.channels as usize),
            ("chunk_size", self.chunk_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(invalid(key, "must be greater than 0"));
            }
        }

        if self.chunk_size % self.format.frame_width() != 0 {
            return Err(invalid(
                "chunk_size",
                &format!(
                    "must be a multiple of the frame width ({} bytes)",
                    self.format.frame_width()
                ),
            ));
        }

        if self.converter.trim().is_empty() {
            return Err(invalid("converter", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Parse one `--model` occurrence: path [sensitivity] [audio_gain] [apply_frontend]
pub fn parse_model(settings: &[String]) -> Result<Model, ConfigError> {
    let bad = |message: String| ConfigError::InvalidModel {
        settings: settings.to_vec(),
        message,
    };

    let path = settings
        .first()
        .filter(|path| !path.is_empty())
        .ok_or_else(|| bad("missing model path".to_string()))?;

    let mut model = Model::new(path);

    if let Some(sensitivity) = settings.get(1) {
        model.sensitivity = sensitivity.clone();
    }

    if let Some(gain) = settings.get(2) {
        model.audio_gain = gain
            .parse()
            .map_err(|e| bad(format!("audio gain '{gain}': {e}")))?;
    }

    if let Some(frontend) = settings.get(3) {
        model.apply_frontend = frontend.trim().eq_ignore_ascii_case("true");
    }

    if settings.len() > 4 {
        return Err(bad("too many values".to_string()));
    }

    Ok(model)
}

impl Cli {
    /// Parse the process arguments, exiting on error
    pub fn parse_args() -> Self {
        Self::try_parse_args_from(std::env::args_os()).unwrap_or_else(|e| e.exit())
    }

    /// Parse arguments, keeping each `--model` occurrence as its own group
    pub fn try_parse_args_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        let mut cli = Self::from_arg_matches(&matches)?;

        cli.model_groups = matches
            .get_occurrences::<String>("model")
            .map(|occurrences| {
                occurrences
                    .map(|values| values.cloned().collect())
                    .collect()
            })
            .unwrap_or_default();

        Ok(cli)
    }

    /// Settings for each model, one group per `--model`
    ///
    /// Without occurrence grouping every value is taken as a bare model path.
    pub fn model_settings(&self) -> Vec<Vec<String>> {
        if !self.model_groups.is_empty() {
            return self.model_groups.clone();
        }

        self.model.iter().map(|path| vec![path.clone()]).collect()
    }

    /// Build and validate the service configuration
    pub fn to_config(&self) -> Result<ServiceConfig, ConfigError> {
        let models = self
            .model_settings()
            .iter()
            .map(|settings| parse_model(settings))
            .collect::<Result<Vec<_>, _>>()?;

        let config = ServiceConfig {
            bindings: WakewordBinding::bind_all(models, &self.wakeword_id),
            site_ids: self.site_id.clone(),
            enabled: !self.disabled,
            format: AudioFormat::new(self.sample_rate, self.sample_width, self.channels),
            chunk_size: self.chunk_size,
            resource_path: self.resource.clone().unwrap_or_default(),
            converter: self.converter.clone(),
            mqtt: MqttConfig {
                host: self.host.clone(),
                port: self.port,
                username: self.username.clone(),
                password: self.password.clone(),
                ..MqttConfig::default()
            },
        };

        config.validate()?;
        Ok(config)
    }
}
