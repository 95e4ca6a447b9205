//! Staging of inbound voice and audio attachments.
//!
//! An attachment is streamed into a single temp file, handed to ffmpeg, and
//! the converted bytes come back over ffmpeg's stdout. The temp file is owned
//! by a [`TempPath`] so it is removed when staging returns, whatever the
//! outcome.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Canonical encodings handed to a transcriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// MP3 container, what the hosted transcription endpoint is fed.
    Mp3,
    /// Raw 16 kHz mono signed 16-bit little-endian PCM, for local Whisper.
    PcmS16Le16k,
}

const MP3_ARGS: &[&str] = &["-vn", "-f", "mp3"];
const PCM_ARGS: &[&str] = &["-vn", "-ar", "16000", "-ac", "1", "-f", "s16le", "-acodec", "pcm_s16le"];

impl AudioFormat {
    fn ffmpeg_args(&self) -> &'static [&'static str] {
        match self {
            AudioFormat::Mp3 => MP3_ARGS,
            AudioFormat::PcmS16Le16k => PCM_ARGS,
        }
    }
}

/// Streams a remote attachment into a local file.
pub trait AudioFetcher: Send + Sync {
    /// Returns the number of bytes written.
    fn fetch(&self, file_id: &str, dst: &mut tokio::fs::File) -> impl Future<Output = Result<u64, String>> + Send;
}

/// Re-encodes a staged file into one of the [`AudioFormat`]s.
pub trait AudioConverter: Send + Sync {
    fn convert(&self, source: &Path, format: AudioFormat) -> impl Future<Output = Result<Vec<u8>, String>> + Send;
}

/// Converter backed by the `ffmpeg` binary.
pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl AudioConverter for Ffmpeg {
    async fn convert(&self, source: &Path, format: AudioFormat) -> Result<Vec<u8>, String> {
        let output = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(source)
            .args(format.ffmpeg_args())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Failed to run ffmpeg: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("ffmpeg failed ({}): {}", output.status, stderr.trim()));
        }
        if output.stdout.is_empty() {
            return Err("ffmpeg produced no audio".to_string());
        }

        debug!("Converted {:?} to {:?} ({} bytes)", source, format, output.stdout.len());
        Ok(output.stdout)
    }
}

/// Why an audio turn could not be turned into text.
#[derive(Debug)]
pub enum AudioProcessingError {
    TempFile(std::io::Error),
    Download(String),
    Convert(String),
    Transcribe(String),
}

impl fmt::Display for AudioProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TempFile(e) => write!(f, "failed to create temp audio file: {e}"),
            Self::Download(e) => write!(f, "audio download failed: {e}"),
            Self::Convert(e) => write!(f, "audio conversion failed: {e}"),
            Self::Transcribe(e) => write!(f, "transcription failed: {e}"),
        }
    }
}

impl std::error::Error for AudioProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TempFile(e) => Some(e),
            _ => None,
        }
    }
}

pub struct AudioStager<C> {
    converter: C,
    temp_dir: Option<PathBuf>,
}

impl<C: AudioConverter> AudioStager<C> {
    /// `temp_dir` of `None` uses the system temp dir.
    pub fn new(converter: C, temp_dir: Option<PathBuf>) -> Self {
        Self { converter, temp_dir }
    }

    fn temp_file(&self) -> std::io::Result<(std::fs::File, TempPath)> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("personabot-audio-");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file.into_parts())
    }

    /// Download `file_id` and convert it to `format`.
    pub async fn stage<F: AudioFetcher>(
        &self,
        fetcher: &F,
        file_id: &str,
        format: AudioFormat,
    ) -> Result<Vec<u8>, AudioProcessingError> {
        let (file, path) = self.temp_file().map_err(AudioProcessingError::TempFile)?;
        let mut file = tokio::fs::File::from_std(file);

        let written = fetcher
            .fetch(file_id, &mut file)
            .await
            .map_err(AudioProcessingError::Download)?;
        file.flush()
            .await
            .map_err(|e| AudioProcessingError::Download(format!("Failed to flush audio: {e}")))?;
        drop(file);

        if written == 0 {
            return Err(AudioProcessingError::Download("empty audio file".to_string()));
        }
        debug!("Staged {} bytes at {:?}", written, path);

        let converted = self
            .converter
            .convert(&path, format)
            .await
            .map_err(AudioProcessingError::Convert)?;

        // `path` drops here and the file goes with it
        Ok(converted)
    }
}
