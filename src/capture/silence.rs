//! Short-window RMS silence detection.
//!
//! Samples are folded into fixed 100ms windows. Each window's RMS is
//! compared against two thresholds: the silence threshold drives trailing
//! silence (segment finalization), the lower noise gate drives the voiced
//! ratio used to discard segments with no content worth transcribing.

/// Window length used for RMS analysis.
const WINDOW_MS: u32 = 100;

#[derive(Debug, Clone)]
pub struct SilenceConfig {
    /// RMS level below which a window counts as silence
    pub silence_threshold: f32,

    /// Windows above this count toward the voiced ratio
    pub noise_gate_threshold: f32,

    pub sample_rate: u32,
}

/// Windowed RMS detector tracking trailing silence and voiced content.
#[derive(Debug)]
pub struct SilenceDetector {
    config: SilenceConfig,
    window_len: usize,

    /// Partially filled current window
    window: Vec<f32>,

    /// Complete windows seen since the last reset
    windows_total: u64,

    /// Windows above the noise gate since the last reset
    windows_voiced: u64,

    /// Consecutive trailing windows below the silence threshold
    trailing_silent_windows: u64,
}

impl SilenceDetector {
    pub fn new(config: SilenceConfig) -> Self {
        let window_len = (config.sample_rate * WINDOW_MS / 1000).max(1) as usize;
        Self {
            config,
            window_len,
            window: Vec::new(),
            windows_total: 0,
            windows_voiced: 0,
            trailing_silent_windows: 0,
        }
    }

    /// Feed samples into the detector.
    pub fn push(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.window.push(sample);
            if self.window.len() >= self.window_len {
                let level = rms(&self.window);
                self.window.clear();
                self.complete_window(level);
            }
        }
    }

    fn complete_window(&mut self, level: f32) {
        self.windows_total += 1;

        if level > self.config.noise_gate_threshold {
            self.windows_voiced += 1;
        }

        if level > self.config.silence_threshold {
            self.trailing_silent_windows = 0;
        } else {
            self.trailing_silent_windows += 1;
        }
    }

    /// Seconds of trailing silence.
    pub fn trailing_silence_secs(&self) -> f64 {
        self.trailing_silent_windows as f64 * WINDOW_MS as f64 / 1000.0
    }

    /// Fraction of complete windows above the noise gate (0.0 for no data).
    pub fn voiced_ratio(&self) -> f32 {
        if self.windows_total == 0 {
            return 0.0;
        }
        self.windows_voiced as f32 / self.windows_total as f32
    }

    /// Reset all state for the next segment.
    pub fn reset(&mut self) {
        self.window.clear();
        self.windows_total = 0;
        self.windows_voiced = 0;
        self.trailing_silent_windows = 0;
    }
}

/// Root-mean-square level of a sample window.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
