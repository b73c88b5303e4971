/// Audio normalization module
///
/// Audio frames arrive as WAV blobs in whatever format the producer chose.
/// Detectors need raw PCM in one canonical format, so every frame is either
/// unwrapped in place (format already matches) or piped through an external
/// converter.

use std::borrow::Cow;
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, trace};

/// Default pipeline sample rate (16kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Default sample width in bytes (16-bit)
pub const DEFAULT_SAMPLE_WIDTH: u16 = 2;

/// Default channel count (mono)
pub const DEFAULT_CHANNELS: u16 = 1;

/// Default external converter
pub const DEFAULT_CONVERTER: &str = "sox";

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid WAV data: {0}")]
    InvalidWav(#[from] hound::Error),

    #[error("Failed to run converter '{program}': {source}")]
    ConverterSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Converter '{program}' failed ({status}): {stderr}")]
    ConverterFailed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Raw PCM format expected by the detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    /// Bytes per sample
    pub sample_width: u16,
    pub channels: u16,
}

impl AudioFormat {
    /// Create a new audio format
    pub fn new(sample_rate: u32, sample_width: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            sample_width,
            channels,
        }
    }

    /// Bytes occupied by one frame (one sample per channel)
    pub fn frame_width(&self) -> usize {
        self.sample_width as usize * self.channels as usize
    }

    /// Largest multiple of the frame width not exceeding `len`
    pub fn whole_frames(&self, len: usize) -> usize {
        match self.frame_width() {
            0 => 0,
            width => len - len % width,
        }
    }

    fn matches(&self, spec: &hound::WavSpec) -> bool {
        let width = spec.bits_per_sample.div_ceil(8);

        spec.sample_format == hound::SampleFormat::Int
            && spec.sample_rate == self.sample_rate
            && width == self.sample_width
            && spec.channels == self.channels
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_SAMPLE_WIDTH, DEFAULT_CHANNELS)
    }
}

/// Turns a WAV blob into raw PCM in the pipeline's format
pub trait AudioNormalizer: Send {
    /// Return raw PCM for `wav`, borrowing the sample payload when no
    /// conversion is needed
    fn normalize<'a>(&self, wav: &'a [u8]) -> Result<Cow<'a, [u8]>, FormatError>;

    /// Target format produced by this normalizer
    fn format(&self) -> AudioFormat;
}

/// Normalizer that shells out to sox when the input format differs
#[derive(Debug, Clone)]
pub struct SoxNormalizer {
    format: AudioFormat,
    program: String,
}

impl SoxNormalizer {
    pub fn new(format: AudioFormat) -> Self {
        Self::with_program(format, DEFAULT_CONVERTER)
    }

    /// Use a different converter binary (must accept sox arguments)
    pub fn with_program(format: AudioFormat, program: impl Into<String>) -> Self {
        Self {
            format,
            program: program.into(),
        }
    }

    fn converter_args(&self) -> Vec<String> {
        vec![
            "-t".to_string(),
            "wav".to_string(),
            "-".to_string(),
            "-r".to_string(),
            self.format.sample_rate.to_string(),
            "-e".to_string(),
            "signed-integer".to_string(),
            "-b".to_string(),
            (self.format.sample_width * 8).to_string(),
            "-c".to_string(),
            self.format.channels.to_string(),
            "-t".to_string(),
            "raw".to_string(),
            "-".to_string(),
        ]
    }

    fn convert(&self, wav: &[u8]) -> Result<Vec<u8>, FormatError> {
        let spawn_error = |source| FormatError::ConverterSpawn {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(self.converter_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            spawn_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "converter stdin unavailable",
            ))
        })?;

        // Feed stdin from a second thread so a full stdout pipe can't stall us
        let (written, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(wav));
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output = output.map_err(spawn_error)?;

        if !output.status.success() {
            return Err(FormatError::ConverterFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(spawn_error(e)),
            Err(_) => {
                return Err(spawn_error(std::io::Error::other(
                    "converter stdin writer panicked",
                )))
            }
        }

        let mut pcm = output.stdout;
        pcm.truncate(self.format.whole_frames(pcm.len()));

        debug!(
            "Converted {} WAV byte(s) to {} raw byte(s) with {}",
            wav.len(),
            pcm.len(),
            self.program
        );

        Ok(pcm)
    }
}

impl AudioNormalizer for SoxNormalizer {
    fn normalize<'a>(&self, wav: &'a [u8]) -> Result<Cow<'a, [u8]>, FormatError> {
        let reader = hound::WavReader::new(Cursor::new(wav))?;
        let spec = reader.spec();

        if !self.format.matches(&spec) {
            trace!("Converting WAV {:?} to {:?}", spec, self.format);
            return self.convert(wav).map(Cow::Owned);
        }

        let sample_bytes = reader.len() as usize * spec.bits_per_sample.div_ceil(8) as usize;
        let start = (reader.into_inner().position() as usize).min(wav.len());
        let available = sample_bytes.min(wav.len() - start);

        // Truncated data: keep whole frames only so the stream stays aligned
        let whole = self.format.whole_frames(available);
        if whole != sample_bytes {
            debug!(
                "WAV data truncated: header declares {} byte(s), using {}",
                sample_bytes, whole
            );
        }

        Ok(Cow::Borrowed(&wav[start..start + whole]))
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
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

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_default_format() {
        let format = AudioFormat::default();
        assert_eq!(format.sample_rate, 16000);
        assert_eq!(format.sample_width, 2);
        assert_eq!(format.channels, 1);
        assert_eq!(format.frame_width(), 2);
    }

    #[test]
    fn test_matching_format_is_borrowed() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 7) as i16).collect();
        let wav = wav_bytes(16000, 1, &samples);

        let normalizer = SoxNormalizer::new(AudioFormat::default());
        let pcm = normalizer.normalize(&wav).unwrap();

        assert!(matches!(pcm, Cow::Borrowed(_)));
        assert_eq!(pcm.as_ref(), pcm_bytes(&samples).as_slice());
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let samples: Vec<i16> = (0..1000).map(|i| ((i * 31) % 2000 - 1000) as i16).collect();
        let normalizer = SoxNormalizer::new(AudioFormat::default());

        let first = normalizer.normalize(&wav_bytes(16000, 1, &samples)).unwrap().into_owned();

        let decoded: Vec<i16> = first
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let rewrapped = wav_bytes(16000, 1, &decoded);
        let second = normalizer.normalize(&rewrapped).unwrap();

        assert_eq!(first.as_slice(), second.as_ref());
    }

    #[test]
    fn test_empty_wav_yields_no_audio() {
        let wav = wav_bytes(16000, 1, &[]);
        let normalizer = SoxNormalizer::new(AudioFormat::default());
        assert!(normalizer.normalize(&wav).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_wav_keeps_whole_samples() {
        let mut wav = wav_bytes(16000, 1, &[0x1111; 3]);
        wav.pop();

        let normalizer = SoxNormalizer::new(AudioFormat::default());
        let pcm = normalizer.normalize(&wav).unwrap();
        assert_eq!(pcm.as_ref(), pcm_bytes(&[0x1111; 2]).as_slice());

        // The next frame starts on a sample boundary
        let mut stream = pcm.into_owned();
        stream.extend_from_slice(&normalizer.normalize(&wav_bytes(16000, 1, &[0x2222])).unwrap());
        let decoded: Vec<i16> = stream
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(decoded, vec![0x1111, 0x1111, 0x2222]);
    }

    #[test]
    fn test_whole_frames() {
        let stereo = AudioFormat::new(16000, 2, 2);
        assert_eq!(stereo.whole_frames(10), 8);
        assert_eq!(stereo.whole_frames(3), 0);
        assert_eq!(AudioFormat::default().whole_frames(961), 960);
        assert_eq!(AudioFormat::new(16000, 0, 1).whole_frames(10), 0);
    }

    #[test]
    fn test_garbage_is_format_error() {
        let normalizer = SoxNormalizer::new(AudioFormat::default());
        let result = normalizer.normalize(b"definitely not a wav file");
        assert!(matches!(result, Err(FormatError::InvalidWav(_))));
    }

    #[test]
    fn test_mismatch_with_missing_converter() {
        let wav = wav_bytes(44100, 2, &[0; 200]);
        let normalizer =
            SoxNormalizer::with_program(AudioFormat::default(), "hotword-hermes-no-such-converter");

        let result = normalizer.normalize(&wav);
        assert!(matches!(result, Err(FormatError::ConverterSpawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_mismatch_with_failing_converter() {
        let wav = wav_bytes(8000, 1, &[0; 200]);
        let normalizer = SoxNormalizer::with_program(AudioFormat::default(), "false");

        let result = normalizer.normalize(&wav);
        assert!(matches!(result, Err(FormatError::ConverterFailed { .. })));
    }

    #[test]
    fn test_converter_args() {
        let normalizer = SoxNormalizer::new(AudioFormat::new(22050, 2, 2));
        let args = normalizer.converter_args().join(" ");
        assert_eq!(
            args,
            "-t wav - -r 22050 -e signed-integer -b 16 -c 2 -t raw -"
        );
    }
}
