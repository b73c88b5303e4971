/// Integration tests for the hotword service
///
/// Drives `HotwordService` with Hermes topics and WAV payloads, the same way
/// the MQTT transport does.

use hotword_hermes::messages::{audio_frame_topic, TOGGLE_OFF_TOPIC, TOGGLE_ON_TOPIC};
use hotword_hermes::{
    Classification, Detector, DetectorError, EnergyDetector, HotwordService, Model,
    OutboundMessage, ServiceConfig, WakewordBinding,
};
use parking_lot::Mutex;
use std::f32::consts::PI;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 16000;

/// Fires whenever a chunk starts with `trigger`; records every chunk it sees
struct ScriptedDetector {
    trigger: Option<i16>,
    seen: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Detector for ScriptedDetector {
    fn configure(&mut self, _resource_path: &Path, _model_path: &Path) -> Result<(), DetectorError> {
        Ok(())
    }

    fn set_sensitivity(&mut self, _sensitivity: &str) -> Result<(), DetectorError> {
        Ok(())
    }

    fn set_audio_gain(&mut self, _gain: f32) {}

    fn set_frontend(&mut self, _apply: bool) {}

    fn run_detection(&mut self, chunk: &[u8]) -> Classification {
        self.seen.lock().push(chunk.to_vec());

        let first = i16::from_le_bytes([chunk[0], chunk[1]]);
        match self.trigger {
            Some(trigger) if trigger == first => Classification::Match(1),
            _ => Classification::NoMatch,
        }
    }
}

struct Harness {
    service: HotwordService,
    seen: Vec<Arc<Mutex<Vec<Vec<u8>>>>>,
    _dir: TempDir,
}

fn model_file(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"model").unwrap();
    path
}

/// One scripted detector per (model file, wake-word id, trigger sample)
fn harness(
    models: &[(&str, &str, Option<i16>)],
    configure: impl FnOnce(&mut ServiceConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();

    let paths: Vec<Model> = models
        .iter()
        .map(|(file, _, _)| Model::new(model_file(&dir, file)))
        .collect();
    let ids: Vec<String> = models.iter().map(|(_, id, _)| id.to_string()).collect();

    let mut config = ServiceConfig {
        bindings: WakewordBinding::bind_all(paths, &ids),
        ..Default::default()
    };
    configure(&mut config);

    let seen: Vec<_> = models.iter().map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    let mut scripts = models
        .iter()
        .map(|(_, _, trigger)| *trigger)
        .zip(seen.clone())
        .collect::<Vec<_>>()
        .into_iter();

    let service = HotwordService::from_config(&config, || {
        let (trigger, seen) = scripts.next().unwrap();
        Box::new(ScriptedDetector { trigger, seen }) as Box<dyn Detector>
    })
    .unwrap();
    service.start();

    Harness {
        service,
        seen,
        _dir: dir,
    }
}

fn wav_bytes(samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// One 960-byte chunk worth of a constant sample
fn frame_of(value: i16) -> Vec<u8> {
    wav_bytes(&[value; 480])
}

fn generate_tone(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<i16> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = amplitude * (2.0 * PI * frequency * t).sin();
            (sample * i16::MAX as f32) as i16
        })
        .collect()
}

fn json(message: &OutboundMessage) -> serde_json::Value {
    serde_json::from_slice(&message.payload).unwrap()
}

fn toggle(site_id: &str) -> Vec<u8> {
    format!(r#"{{"siteId": "{site_id}"}}"#).into_bytes()
}

#[test]
fn test_detection_published_per_wakeword() {
    let h = harness(
        &[("hey_aether.pmdl", "hey", Some(1000)), ("computer.pmdl", "computer", Some(2000))],
        |_| {},
    );

    let out = h.service.handle_message(&audio_frame_topic("kitchen"), &frame_of(2000));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].topic, "hermes/hotword/computer/detected");

    let payload = json(&out[0]);
    assert_eq!(payload["siteId"], "kitchen");
    assert_eq!(payload["modelId"], "computer");
    assert_eq!(payload["currentSensitivity"], "0.5");
    assert_eq!(payload["modelVersion"], "");
    assert_eq!(payload["modelType"], "personal");

    let out = h.service.handle_message(&audio_frame_topic("kitchen"), &frame_of(1000));
    assert_eq!(out[0].topic, "hermes/hotword/hey/detected");
    assert_eq!(json(&out[0])["modelId"], "hey_aether");

    assert!(h
        .service
        .handle_message(&audio_frame_topic("kitchen"), &frame_of(5))
        .is_empty());
}

#[test]
fn test_first_match_wins() {
    let h = harness(
        &[("first.pmdl", "first", Some(7)), ("second.pmdl", "second", Some(7))],
        |_| {},
    );

    let out = h.service.handle_message(&audio_frame_topic("default"), &frame_of(7));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].topic, "hermes/hotword/first/detected");

    // The second detector never saw the matched chunk
    assert_eq!(h.seen[0].lock().len(), 1);
    assert!(h.seen[1].lock().is_empty());

    // Without a match every detector runs, in order
    h.service.handle_message(&audio_frame_topic("default"), &frame_of(8));
    assert_eq!(h.seen[0].lock().len(), 2);
    assert_eq!(h.seen[1].lock().len(), 1);
}

#[test]
fn test_chunks_span_frame_boundaries() {
    let h = harness(&[("a.pmdl", "a", None)], |_| {});
    let topic = audio_frame_topic("default");

    let samples: Vec<i16> = (0..1000).collect();
    let mut stream = Vec::new();
    for s in &samples {
        stream.extend_from_slice(&s.to_le_bytes());
    }

    // 1000 bytes per frame: one chunk after the first, one more after the second
    h.service.handle_message(&topic, &wav_bytes(&samples[..500]));
    assert_eq!(h.seen[0].lock().len(), 1);
    assert_eq!(h.service.stats().buffered_bytes, 40);

    h.service.handle_message(&topic, &wav_bytes(&samples[500..]));
    let seen = h.seen[0].lock();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|chunk| chunk.len() == 960));
    assert_eq!(seen.concat(), &stream[..1920]);
    assert_eq!(h.service.stats().buffered_bytes, 80);
}

#[test]
fn test_site_scope_and_toggles() {
    let h = harness(&[("alexa.pmdl", "alexa", Some(1))], |config| {
        config.site_ids = vec!["kitchen".to_string(), "office".to_string()];
    });

    let subscriptions = h.service.subscriptions();
    assert!(subscriptions.contains(&TOGGLE_ON_TOPIC.to_string()));
    assert!(subscriptions.contains(&TOGGLE_OFF_TOPIC.to_string()));
    assert!(subscriptions.contains(&audio_frame_topic("kitchen")));
    assert!(subscriptions.contains(&audio_frame_topic("office")));
    assert!(!subscriptions.contains(&audio_frame_topic("+")));

    // Out-of-scope audio is ignored entirely
    assert!(h
        .service
        .handle_message(&audio_frame_topic("garage"), &frame_of(1))
        .is_empty());
    assert!(h.seen[0].lock().is_empty());

    h.service.handle_message(TOGGLE_OFF_TOPIC, &toggle("kitchen"));
    assert!(h
        .service
        .handle_message(&audio_frame_topic("kitchen"), &frame_of(1))
        .is_empty());

    let out = h.service.handle_message(&audio_frame_topic("office"), &frame_of(1));
    assert_eq!(out.len(), 1);
    assert_eq!(json(&out[0])["siteId"], "office");

    h.service.handle_message(TOGGLE_ON_TOPIC, &toggle("kitchen"));
    let out = h.service.handle_message(&audio_frame_topic("kitchen"), &frame_of(1));
    assert_eq!(out.len(), 1);
    assert_eq!(json(&out[0])["siteId"], "kitchen");
}

#[test]
fn test_starts_disabled_until_toggled_on() {
    let h = harness(&[("alexa.pmdl", "alexa", Some(1))], |config| {
        config.enabled = false;
    });

    assert!(h
        .service
        .handle_message(&audio_frame_topic("default"), &frame_of(1))
        .is_empty());

    // Empty toggle payload addresses the default site
    h.service.handle_message(TOGGLE_ON_TOPIC, b"");
    assert_eq!(
        h.service
            .handle_message(&audio_frame_topic("default"), &frame_of(1))
            .len(),
        1
    );
}

#[test]
fn test_bad_messages_are_dropped() {
    let h = harness(&[("alexa.pmdl", "alexa", Some(1))], |_| {});
    let topic = audio_frame_topic("default");

    assert!(h.service.handle_message(&topic, b"not a wav").is_empty());
    assert!(h.service.handle_message(TOGGLE_OFF_TOPIC, b"{broken").is_empty());
    assert!(h.service.handle_message("hermes/other", b"{}").is_empty());

    // Still running and still enabled
    assert_eq!(h.service.handle_message(&topic, &frame_of(1)).len(), 1);
}

#[test]
fn test_stopped_service_publishes_nothing() {
    let h = harness(&[("alexa.pmdl", "alexa", Some(1))], |_| {});
    h.service.stop();

    assert!(h
        .service
        .handle_message(&audio_frame_topic("default"), &frame_of(1))
        .is_empty());
    assert!(h.seen[0].lock().is_empty());
}

fn energy_service(dir: &TempDir) -> HotwordService {
    let config = ServiceConfig {
        bindings: WakewordBinding::bind_all(
            vec![Model::new(model_file(dir, "energy.pmdl"))],
            &["energy".to_string()],
        ),
        ..Default::default()
    };

    HotwordService::from_config(&config, || Box::new(EnergyDetector::new()) as Box<dyn Detector>)
        .unwrap()
}

#[test]
fn test_batch_detection_with_energy_detector() {
    let dir = tempfile::tempdir().unwrap();
    let service = energy_service(&dir);

    let mut audio = vec![0i16; SAMPLE_RATE as usize / 2];
    audio.extend(generate_tone(440.0, 0.5, 0.5));
    audio.extend(vec![0i16; SAMPLE_RATE as usize / 2]);

    let mut output = Vec::new();
    let count = service
        .run_batch(Cursor::new(wav_bytes(&audio)), &mut output)
        .unwrap();
    assert_eq!(count, 1);

    let text = String::from_utf8(output).unwrap();
    let event: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(event["siteId"], "default");
    assert_eq!(event["modelId"], "energy");
}

#[test]
fn test_no_false_positives_on_silence() {
    let dir = tempfile::tempdir().unwrap();
    let service = energy_service(&dir);

    let silence = vec![0i16; SAMPLE_RATE as usize * 2];
    let count = service
        .run_batch(Cursor::new(wav_bytes(&silence)), Vec::<u8>::new())
        .unwrap();

    assert_eq!(count, 0);
    assert!(service.stats().chunks_processed > 0);
}

#[test]
fn test_missing_model_file_fails() {
    let config = ServiceConfig {
        bindings: WakewordBinding::bind_all(vec![Model::new("/nonexistent/hey.pmdl")], &[]),
        ..Default::default()
    };

    let result =
        HotwordService::from_config(&config, || Box::new(EnergyDetector::new()) as Box<dyn Detector>);
    assert!(matches!(result, Err(DetectorError::ModelNotFound(_))));
}
