/// Message dispatcher
///
/// Routes inbound Hermes messages: toggles update the site gate, audio
/// frames are normalized, buffered, chunked and run through the detector
/// pool. Every failure is logged and the offending message dropped, so a
/// single bad frame never takes the service down.

use crate::detector::{DetectorPool, PoolStats};
use crate::frame_buffer::FrameBuffer;
use crate::messages::{
    audio_frame_site_id, audio_frame_topic, HotwordEvent, HotwordToggle, MessageError,
    OutboundMessage, SITE_WILDCARD, TOGGLE_OFF_TOPIC, TOGGLE_ON_TOPIC,
};
use crate::normalizer::{AudioNormalizer, FormatError};
use crate::site_gate::SiteGate;
use thiserror::Error;
use tracing::{debug, error, info, trace};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Single owner of the detection pipeline state
pub struct Dispatcher {
    pool: DetectorPool,
    normalizer: Box<dyn AudioNormalizer>,
    gate: SiteGate,
    buffer: FrameBuffer,
    chunk_size: usize,
}

impl Dispatcher {
    pub fn new(
        pool: DetectorPool,
        normalizer: Box<dyn AudioNormalizer>,
        gate: SiteGate,
        chunk_size: usize,
    ) -> Self {
        Self {
            pool,
            normalizer,
            gate,
            buffer: FrameBuffer::new(),
            chunk_size,
        }
    }

    /// Topics to subscribe to (on every connect)
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = vec![TOGGLE_ON_TOPIC.to_string(), TOGGLE_OFF_TOPIC.to_string()];

        if self.gate.scope().is_empty() {
            topics.push(audio_frame_topic(SITE_WILDCARD));
        } else {
            topics.extend(self.gate.scope().sites().map(audio_frame_topic));
        }

        topics
    }

    /// Handle one inbound message and return what should be published
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> Vec<OutboundMessage> {
        let events = match self.route(topic, payload) {
            Ok(events) => events,
            Err(e) => {
                error!("on_message ({}): {}", topic, e);
                return Vec::new();
            }
        };

        events
            .iter()
            .filter_map(|event| match event.to_outbound() {
                Ok(message) => Some(message),
                Err(e) => {
                    error!("publish: {}", e);
                    None
                }
            })
            .collect()
    }

    fn route(&mut self, topic: &str, payload: &[u8]) -> Result<Vec<HotwordEvent>, DispatchError> {
        let site_id = audio_frame_site_id(topic);

        if site_id.is_none() {
            debug!("Received {} byte(s) on {}", payload.len(), topic);
        }

        if topic == TOGGLE_ON_TOPIC || topic == TOGGLE_OFF_TOPIC {
            let toggle = HotwordToggle::from_payload(topic, payload)?;
            self.gate.set_enabled(&toggle.site_id, topic == TOGGLE_ON_TOPIC);
            return Ok(Vec::new());
        }

        let Some(site_id) = site_id else {
            return Ok(Vec::new());
        };

        if !self.gate.scope().accepts(site_id) {
            return Ok(Vec::new());
        }

        if !self.gate.is_enabled(site_id) {
            trace!("Dropping audio frame from disabled site {}", site_id);
            return Ok(Vec::new());
        }

        if self.gate.take_first_audio(site_id) {
            debug!("Receiving audio from {}", site_id);
        }

        Ok(self.handle_audio_frame(payload, site_id)?)
    }

    /// Normalize a WAV frame, buffer it and run every full chunk
    ///
    /// Bypasses the site gate; used directly for one-shot batch input.
    pub fn handle_audio_frame(
        &mut self,
        wav: &[u8],
        site_id: &str,
    ) -> Result<Vec<HotwordEvent>, FormatError> {
        let audio = self.normalizer.normalize(wav)?;
        self.buffer.append(&audio);

        let mut events = Vec::new();
        for chunk in self.buffer.drain_chunks(self.chunk_size) {
            if let Some(event) = self.pool.run(&chunk, site_id) {
                match &event {
                    HotwordEvent::Detected { wakeword_id, .. } => {
                        info!("Hotword {} detected on {}", wakeword_id, site_id)
                    }
                    HotwordEvent::Error(e) => error!("Hotword error on {}: {}", site_id, e.error),
                }
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Bytes waiting for a full chunk
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn gate(&self) -> &SiteGate {
        &self.gate
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
