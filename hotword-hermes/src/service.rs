/// Hotword service
///
/// Owns the dispatcher behind a single mutex and exposes start/stop
/// lifecycle, bus dispatch and one-shot batch processing.

use crate::config::ServiceConfig;
use crate::detector::{Detector, DetectorError, DetectorPool};
use crate::dispatcher::Dispatcher;
use crate::messages::{HotwordEvent, MessageError, OutboundMessage, DEFAULT_SITE_ID};
use crate::normalizer::{FormatError, SoxNormalizer};
use crate::site_gate::{SiteGate, SiteScope};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("Subscribe to {topic} failed: {message}")]
    Subscribe { topic: String, message: String },
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Outbound side of the message bus
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;
}

/// Service statistics
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub chunks_processed: u64,
    pub detections: u64,
    pub buffered_bytes: usize,
    pub is_running: bool,
}

/// Hermes hotword service
pub struct HotwordService {
    dispatcher: Mutex<Dispatcher>,
    running: AtomicBool,
}

impl HotwordService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Mutex::new(dispatcher),
            running: AtomicBool::new(false),
        }
    }

    /// Load detectors and wire the pipeline described by `config`
    pub fn from_config<F>(config: &ServiceConfig, factory: F) -> Result<Self, DetectorError>
    where
        F: FnMut() -> Box<dyn Detector>,
    {
        info!("Initializing hotword service");
        info!("Audio format: {:?}, chunk size: {}", config.format, config.chunk_size);
        if !config.site_ids.is_empty() {
            info!("Sites: {}", config.site_ids.join(", "));
        }

        let pool = DetectorPool::load(config.bindings.clone(), &config.resource_path, factory)?;
        let normalizer = SoxNormalizer::with_program(config.format, config.converter.clone());
        let gate = SiteGate::new(SiteScope::new(config.site_ids.clone()), config.enabled);

        Ok(Self::new(Dispatcher::new(
            pool,
            Box::new(normalizer),
            gate,
            config.chunk_size,
        )))
    }

    /// Start accepting messages
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Service already running");
            return;
        }
        info!("Hotword service started");
    }

    /// Stop accepting messages; buffered audio is kept
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Service not running");
            return;
        }
        info!("Hotword service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Topics to subscribe to
    pub fn subscriptions(&self) -> Vec<String> {
        self.dispatcher.lock().subscriptions()
    }

    /// Handle one inbound message; returns nothing while stopped
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Vec<OutboundMessage> {
        if !self.is_running() {
            return Vec::new();
        }

        // The whole message is handled under one lock so chunk order holds
        self.dispatcher.lock().handle_message(topic, payload)
    }

    /// Handle one inbound message and publish the results
    ///
    /// Detection and audio conversion block. On a multi-threaded runtime they
    /// run through `block_in_place` so other tasks keep being scheduled.
    pub async fn dispatch<P>(&self, publisher: &P, topic: &str, payload: &[u8])
    where
        P: Publisher + ?Sized,
    {
        let messages = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.handle_message(topic, payload))
            }
            _ => self.handle_message(topic, payload),
        };

        for message in messages {
            debug!("Publishing {} byte(s) to {}", message.payload.len(), message.topic);
            if let Err(e) = publisher.publish(message).await {
                error!("publish: {}", e);
            }
        }
    }

    /// Run a complete WAV blob through the detectors (default site)
    pub fn process_wav(&self, wav: &[u8]) -> Result<Vec<HotwordEvent>, FormatError> {
        self.dispatcher.lock().handle_audio_frame(wav, DEFAULT_SITE_ID)
    }

    /// Read WAV audio from `input` and write one JSON event per line
    ///
    /// Returns the number of events written.
    pub fn run_batch<R, W>(&self, mut input: R, mut output: W) -> Result<usize, BatchError>
    where
        R: Read,
        W: Write,
    {
        let mut wav = Vec::new();
        input.read_to_end(&mut wav)?;
        debug!("Read {} WAV byte(s)", wav.len());

        let events = self.process_wav(&wav)?;
        for event in &events {
            writeln!(output, "{}", event.to_json()?)?;
        }
        output.flush()?;

        Ok(events.len())
    }

    /// Get current statistics
    pub fn stats(&self) -> ServiceStats {
        let dispatcher = self.dispatcher.lock();
        let pool = dispatcher.stats();

        ServiceStats {
            chunks_processed: pool.chunks_processed,
            detections: pool.detections,
            buffered_bytes: dispatcher.buffered(),
            is_running: self.is_running(),
        }
    }
}
