//! Speech-to-text for voice messages.
//!
//! Two backends: the hosted `/audio/transcriptions` endpoint (fed MP3) and a
//! local whisper-rs model (fed 16 kHz PCM).

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::chatbot::audio::AudioFormat;

pub trait Transcriber: Send + Sync {
    /// Encoding the staged audio must be converted to.
    fn input_format(&self) -> AudioFormat;

    fn transcribe(&self, audio: Vec<u8>) -> impl Future<Output = Result<String, String>> + Send;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for an OpenAI-compatible transcription endpoint.
pub struct OpenAiTranscriber {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl OpenAiTranscriber {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http: reqwest::Client::new(),
        }
    }
}

impl Transcriber for OpenAiTranscriber {
    fn input_format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, String> {
        debug!("Uploading {} bytes for transcription", audio.len());

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("audio.mp3")
            .mime_str("audio/mpeg")
            .map_err(|e| format!("Invalid mime type: {e}"))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("Transcription request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Transcription API error {status}: {body}"));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse transcription: {e}"))?;

        let text = parsed.text.trim().to_string();
        info!("Transcribed: \"{}\"", truncate(&text, 100));
        Ok(text)
    }
}

/// Local whisper.cpp model.
pub struct Whisper {
    ctx: Arc<WhisperContext>,
}

impl Whisper {
    /// Load a Whisper model from a .bin file.
    pub fn new(model_path: &Path) -> Result<Self, String> {
        info!("Loading Whisper model from {:?}", model_path);

        if !model_path.exists() {
            return Err(format!("Model file not found: {:?}", model_path));
        }

        let ctx = WhisperContext::new_with_params(
            model_path.to_str().ok_or("Invalid model path")?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| format!("Failed to load Whisper model: {e}"))?;

        info!("Whisper model loaded");
        Ok(Self { ctx: Arc::new(ctx) })
    }

    /// Transcribe raw 16 kHz mono s16le PCM. Blocks; call from a blocking task.
    pub fn transcribe_pcm(&self, pcm: &[u8]) -> Result<String, String> {
        run_whisper(&self.ctx, &pcm_to_f32(pcm))
    }
}

impl Transcriber for Whisper {
    fn input_format(&self) -> AudioFormat {
        AudioFormat::PcmS16Le16k
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, String> {
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || run_whisper(&ctx, &pcm_to_f32(&audio)))
            .await
            .map_err(|e| format!("Whisper task failed: {e}"))?
    }
}

fn run_whisper(ctx: &WhisperContext, samples: &[f32]) -> Result<String, String> {
    if samples.is_empty() {
        return Err("no audio samples".to_string());
    }

    let mut state = ctx
        .create_state()
        .map_err(|e| format!("Failed to create Whisper state: {e}"))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(Some("auto"));
    params.set_translate(false);
    params.set_no_timestamps(true);
    params.set_single_segment(false);

    state
        .full(params, samples)
        .map_err(|e| format!("Whisper transcription failed: {e}"))?;

    let mut text = String::new();
    for segment in state.as_iter() {
        if let Ok(s) = segment.to_str() {
            text.push_str(s);
            text.push(' ');
        }
    }

    let text = text.trim().to_string();
    info!("Transcribed locally: \"{}\"", truncate(&text, 100));
    Ok(text)
}

fn pcm_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

/// The backend picked at startup.
pub enum Transcription {
    Hosted(OpenAiTranscriber),
    Local(Whisper),
}

impl Transcriber for Transcription {
    fn input_format(&self) -> AudioFormat {
        match self {
            Transcription::Hosted(t) => t.input_format(),
            Transcription::Local(w) => w.input_format(),
        }
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, String> {
        match self {
            Transcription::Hosted(t) => t.transcribe(audio).await,
            Transcription::Local(w) => w.transcribe(audio).await,
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        assert_eq!(truncate("привет мир", 6), "привет...");
    }

    #[test]
    fn test_pcm_to_f32() {
        let pcm = [0x00, 0x00, 0x00, 0x40, 0x00, 0x80];
        let samples = pcm_to_f32(&pcm);
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_pcm_to_f32_drops_odd_byte() {
        assert_eq!(pcm_to_f32(&[0x00, 0x40, 0x01]).len(), 1);
    }

    #[test]
    fn test_missing_model() {
        let err = match Whisper::new(Path::new("/nonexistent/ggml.bin")) {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.contains("Model file not found"));
    }

    #[test]
    fn test_hosted_wants_mp3() {
        let t = OpenAiTranscriber::new("k".into(), "https://api.openai.com/v1/".into(), "whisper-1".into());
        assert_eq!(t.input_format(), AudioFormat::Mp3);
        assert_eq!(t.base_url, "https://api.openai.com/v1");
        assert_eq!(Transcription::Hosted(t).input_format(), AudioFormat::Mp3);
    }

    #[test]
    fn test_transcription_response() {
        let parsed: TranscriptionResponse = serde_json::from_str(r#"{"text":" hi there "}"#).unwrap();
        assert_eq!(parsed.text, " hi there ");
    }
}
