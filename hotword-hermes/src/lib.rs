/// Hermes hotword service library
///
/// Streams Hermes audio frames through one or more wake-word detectors and
/// turns their results into hotword detected/error messages. Detection can
/// be toggled per site.

pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod energy;
pub mod frame_buffer;
pub mod messages;
pub mod mqtt;
pub mod normalizer;
pub mod service;
pub mod site_gate;

// Re-export main types
pub use config::{Cli, ConfigError, MqttConfig, ServiceConfig};
pub use detector::{
    Classification, Detector, DetectorError, DetectorPool, Model, PoolStats, WakewordBinding,
};
pub use dispatcher::{DispatchError, Dispatcher};
pub use energy::{EnergyConfig, EnergyDetector};
pub use frame_buffer::{FrameBuffer, DEFAULT_CHUNK_SIZE};
pub use messages::{HotwordDetected, HotwordError, HotwordEvent, HotwordToggle, OutboundMessage};
pub use mqtt::{MqttPublisher, MqttTransport};
pub use normalizer::{AudioFormat, AudioNormalizer, FormatError, SoxNormalizer};
pub use service::{BatchError, HotwordService, Publisher, ServiceStats, TransportError};
pub use site_gate::{SiteGate, SiteScope};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging
///
/// `RUST_LOG` takes precedence; otherwise `debug` selects the level for this
/// crate.
pub fn init_logging(debug: bool) {
    let default = if debug {
        "hotword_hermes=debug"
    } else {
        "hotword_hermes=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
