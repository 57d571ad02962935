//! Whisper transcription backend.
//!
//! Shells out to a local whisper binary and parses its JSON output.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{EngineError, Transcription, TranscriptionEngine};

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    avg_logprob: f64,
}

/// Transcription engine backed by the `whisper` CLI.
pub struct WhisperCliEngine {
    /// Path to the whisper binary (WHISPER_PATH or "whisper")
    binary_path: String,

    /// Model size (tiny, base, small, medium, large)
    model: String,

    /// Per-call timeout
    call_timeout: Duration,
}

impl WhisperCliEngine {
    pub fn new(model: impl Into<String>, call_timeout: Duration) -> Self {
        let binary_path =
            std::env::var("WHISPER_PATH").unwrap_or_else(|_| "whisper".to_string());

        Self {
            binary_path,
            model: model.into(),
            call_timeout,
        }
    }

    async fn run_whisper(
        &self,
        audio_path: &Path,
        language_hint: &str,
    ) -> Result<WhisperOutput, EngineError> {
        // Whisper writes its JSON next to the audio; keep it in a temp dir
        let temp_dir = tempfile::tempdir()
            .map_err(|e| EngineError::Failed(format!("failed to create temp dir: {}", e)))?;

        let child = Command::new(&self.binary_path)
            .arg(audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .arg("--language")
            .arg(language_hint)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("{}: {}", self.binary_path, e)))?;

        let output = timeout(self.call_timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::Timeout(self.call_timeout))?
            .map_err(|e| EngineError::Failed(format!("failed to wait for whisper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Failed(format!(
                "whisper exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|e| EngineError::Failed(format!("failed to read whisper output: {}", e)))?;

        serde_json::from_str(&json_content)
            .map_err(|e| EngineError::Failed(format!("failed to parse whisper JSON: {}", e)))
    }
}

#[async_trait]
impl TranscriptionEngine for WhisperCliEngine {
    fn name(&self) -> &str {
        "whisper-cli"
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        language_hint: &str,
    ) -> Result<Transcription, EngineError> {
        let output = self.run_whisper(audio_path, language_hint).await?;

        let confidence = confidence_from_segments(&output.segments);
        debug!(
            chars = output.text.len(),
            confidence,
            "whisper transcription complete"
        );

        Ok(Transcription {
            text: output.text.trim().to_string(),
            confidence,
        })
    }
}

/// Map whisper's average log-probabilities to a 0..1 confidence.
fn confidence_from_segments(segments: &[WhisperSegment]) -> f32 {
    if segments.is_empty() {
        return 0.0;
    }

    let mean_logprob: f64 =
        segments.iter().map(|s| s.avg_logprob).sum::<f64>() / segments.len() as f64;

    (mean_logprob.exp() as f32).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_from_segments() {
        assert_eq!(confidence_from_segments(&[]), 0.0);

        // logprob 0 = certainty
        let certain = vec![WhisperSegment { avg_logprob: 0.0 }];
        assert!((confidence_from_segments(&certain) - 1.0).abs() < 1e-6);

        // Very negative logprob approaches zero confidence
        let unsure = vec![WhisperSegment { avg_logprob: -10.0 }];
        assert!(confidence_from_segments(&unsure) < 0.01);
    }

    #[test]
    fn test_output_parsing() {
        let json = r#"{
            "text": " hello world ",
            "language": "en",
            "segments": [{"avg_logprob": -0.2}, {"avg_logprob": -0.4}]
        }"#;

        let output: WhisperOutput = serde_json::from_str(json).unwrap();
        assert_eq!(output.text, " hello world ");
        assert_eq!(output.segments.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let engine = WhisperCliEngine {
            binary_path: "/nonexistent/whisper".to_string(),
            model: "base".to_string(),
            call_timeout: Duration::from_secs(5),
        };

        let err = engine
            .transcribe(Path::new("/tmp/a.wav"), "en")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
        assert!(err.is_transient());
    }
}
