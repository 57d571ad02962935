//! Segment writer: rolling capture buffer with silence-based finalization.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::debug;

use crate::config::AudioConfig;
use crate::core::clock::SharedClock;
use crate::domain::{AudioSegment, SegmentId};

use super::silence::{SilenceConfig, SilenceDetector};
use super::CaptureError;

/// Owns the live capture buffer and emits finalized segments.
///
/// A segment finalizes when the buffer reaches the target duration, or when
/// trailing silence exceeds the configured pause length and enough audio has
/// accumulated. Segments whose voiced ratio falls below `min_voiced_ratio`
/// are discarded instead of queued.
pub struct SegmentWriter {
    config: AudioConfig,
    audio_dir: PathBuf,
    clock: SharedClock,
    detector: SilenceDetector,

    buffer: Vec<f32>,
    buffer_start: Option<DateTime<Utc>>,
    next_id: SegmentId,
}

impl SegmentWriter {
    pub fn new(
        config: AudioConfig,
        audio_dir: PathBuf,
        clock: SharedClock,
        first_id: SegmentId,
    ) -> Self {
        let detector = SilenceDetector::new(SilenceConfig {
            silence_threshold: config.silence_threshold,
            noise_gate_threshold: config.noise_gate_threshold,
            sample_rate: config.sample_rate,
        });

        Self {
            config,
            audio_dir,
            clock,
            detector,
            buffer: Vec::new(),
            buffer_start: None,
            next_id: first_id,
        }
    }

    /// Seconds of audio currently buffered.
    pub fn buffered_secs(&self) -> f64 {
        self.buffer.len() as f64 / self.config.sample_rate as f64
    }

    /// The id the next finalized segment will get.
    pub fn next_id(&self) -> SegmentId {
        self.next_id
    }

    /// Feed captured samples. Returns a finalized segment when a boundary
    /// is reached.
    pub fn feed(&mut self, samples: &[f32]) -> Result<Option<AudioSegment>, CaptureError> {
        if samples.is_empty() {
            return Ok(None);
        }

        if self.buffer.is_empty() {
            self.buffer_start = Some(self.clock.now());
        }

        self.buffer.extend_from_slice(samples);
        self.detector.push(samples);

        let elapsed = self.buffered_secs();

        if elapsed >= self.config.segment_duration_secs as f64 {
            return self.finalize();
        }

        if self.detector.trailing_silence_secs() >= self.config.silence_duration_secs
            && elapsed >= self.config.min_audio_duration_secs
        {
            return self.finalize();
        }

        Ok(None)
    }

    /// Finalize whatever is buffered, regardless of the target duration.
    ///
    /// Used on shutdown and on forced flushes. Minimum-duration and
    /// voiced-ratio policies still apply, so a trailing sliver of room tone
    /// is not emitted.
    pub fn force_finalize(&mut self) -> Result<Option<AudioSegment>, CaptureError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        self.finalize()
    }

    fn finalize(&mut self) -> Result<Option<AudioSegment>, CaptureError> {
        let samples = std::mem::take(&mut self.buffer);
        let start_time = self.buffer_start.take();
        let duration_secs = samples.len() as f64 / self.config.sample_rate as f64;

        let voiced_ratio = self.detector.voiced_ratio();
        self.detector.reset();

        if duration_secs < self.config.min_audio_duration_secs {
            debug!(duration_secs, "discarding short segment");
            return Ok(None);
        }

        if voiced_ratio < self.config.min_voiced_ratio {
            debug!(duration_secs, voiced_ratio, "discarding low-content segment");
            return Ok(None);
        }

        let now = self.clock.now();
        let start_time = start_time
            .unwrap_or_else(|| now - Duration::milliseconds((duration_secs * 1000.0) as i64));

        let id = self.next_id;
        self.next_id = self.next_id.next();

        let file_name = format!("audio_{}_{}.wav", start_time.format("%Y%m%d_%H%M%S"), id);
        let audio_path = self.audio_dir.join(file_name);
        self.write_wav(&audio_path, &samples)?;

        let segment = AudioSegment {
            id,
            start_time,
            duration_secs,
            audio_path,
            silence_ratio: 1.0 - voiced_ratio,
            sample_rate: self.config.sample_rate,
        };

        debug!(
            segment_id = %segment.id,
            duration_secs,
            silence_ratio = segment.silence_ratio,
            "segment finalized"
        );

        Ok(Some(segment))
    }

    /// Write samples as 16-bit PCM WAV.
    fn write_wav(&self, path: &PathBuf, samples: &[f32]) -> Result<(), CaptureError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut writer = WavWriter::create(path, spec)?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;

        Ok(())
    }
}
