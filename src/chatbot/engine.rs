//! Chatbot engine - turns inbound user messages into persona replies.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::chatbot::audio::{AudioConverter, AudioFetcher, AudioProcessingError, AudioStager, Ffmpeg};
use crate::chatbot::message::Role;
use crate::chatbot::profile::ProfileLoader;
use crate::chatbot::session::SessionStore;
use crate::chatbot::whisper::Transcriber;
use crate::openai::LanguageModel;

/// Sent (and stored) when the language model can't produce a reply.
pub const FALLBACK_REPLY: &str = "Something's gone wrong and I cannot respond.";

pub const DEFAULT_GREETING: &str =
    "🙄 Can’t handle it on your own, huh? Alright, spill it – what do you need?";

pub const DEFAULT_CONTEXT_WINDOW: usize = 4;

/// Chatbot configuration.
#[derive(Debug, Clone)]
pub struct ChatbotConfig {
    /// Name of the persona profile to load each turn.
    pub persona: String,
    pub profiles_dir: PathBuf,
    pub greeting: String,
    /// Number of trailing messages sent to the model.
    pub context_window: usize,
    /// Where voice attachments are staged. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            persona: "anya5".to_string(),
            profiles_dir: PathBuf::from("profiles"),
            greeting: DEFAULT_GREETING.to_string(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            temp_dir: None,
        }
    }
}

/// Result of a voice turn: what the user said and what the bot answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTurn {
    pub transcript: String,
    pub reply: String,
}

/// The chatbot engine.
pub struct ChatbotEngine<L, T, C = Ffmpeg> {
    config: ChatbotConfig,
    sessions: SessionStore,
    profiles: ProfileLoader,
    llm: L,
    transcriber: T,
    stager: AudioStager<C>,
}

impl<L, T> ChatbotEngine<L, T, Ffmpeg>
where
    L: LanguageModel,
    T: Transcriber,
{
    pub fn new(config: ChatbotConfig, llm: L, transcriber: T) -> Self {
        Self::with_converter(config, llm, transcriber, Ffmpeg::default())
    }
}

impl<L, T, C> ChatbotEngine<L, T, C>
where
    L: LanguageModel,
    T: Transcriber,
    C: AudioConverter,
{
    pub fn with_converter(config: ChatbotConfig, llm: L, transcriber: T, converter: C) -> Self {
        let profiles = ProfileLoader::new(config.profiles_dir.clone());
        let stager = AudioStager::new(converter, config.temp_dir.clone());
        Self {
            config,
            sessions: SessionStore::new(),
            profiles,
            llm,
            transcriber,
            stager,
        }
    }

    pub fn config(&self) -> &ChatbotConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one text turn and return the reply to deliver.
    ///
    /// Never fails: upstream errors become [`FALLBACK_REPLY`], which is also
    /// what gets stored as the assistant turn.
    pub async fn handle_turn(&self, user_id: i64, inbound_text: &str) -> String {
        let persona = self.profiles.load(&self.config.persona).await;

        let handle = self
            .sessions
            .get_or_create(user_id, &persona, &self.config.greeting)
            .await;
        // Held until the reply is stored, so turns from one user can't interleave.
        let mut session = handle.lock().await;
        session.refresh_persona(&persona);

        info!(
            "💬 {}: \"{}\"",
            user_id,
            inbound_text.chars().take(50).collect::<String>()
        );
        session.append(Role::User, inbound_text);

        let window = session.windowed_context(&persona, self.config.context_window);
        debug!("Context window for {}: {:?}", user_id, window);

        let reply = match self.llm.complete(&window).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("Language model error for {}: {}", user_id, e);
                FALLBACK_REPLY.to_string()
            }
        };

        session.append(Role::Assistant, reply.as_str());
        debug!("Session {} now has {} message(s)", user_id, session.len());
        reply
    }

    /// Download, transcribe and answer a voice or audio message.
    ///
    /// Any failure before a transcript exists is returned as-is and leaves the
    /// session untouched.
    pub async fn handle_audio_turn<F: AudioFetcher>(
        &self,
        user_id: i64,
        fetcher: &F,
        file_id: &str,
    ) -> Result<AudioTurn, AudioProcessingError> {
        info!("🎤 Audio from {}", user_id);

        let audio = self
            .stager
            .stage(fetcher, file_id, self.transcriber.input_format())
            .await?;

        let transcript = self
            .transcriber
            .transcribe(audio)
            .await
            .map_err(AudioProcessingError::Transcribe)?;
        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Err(AudioProcessingError::Transcribe("empty transcript".to_string()));
        }

        let reply = self.handle_turn(user_id, &transcript).await;
        Ok(AudioTurn { transcript, reply })
    }

    /// Start the user over with just the greeting. Returns the greeting.
    pub async fn reset(&self, user_id: i64) -> String {
        info!("🔄 Reset session for {}", user_id);
        self.sessions.reset(user_id, &self.config.greeting).await;
        self.config.greeting.clone()
    }
}
