//! Chatbot module - relays Telegram messages to a persona on a hosted model.

pub mod audio;
pub mod engine;
pub mod message;
pub mod profile;
pub mod session;
pub mod telegram;
pub mod whisper;


pub use audio::{AudioConverter, AudioFetcher, AudioFormat, AudioProcessingError, Ffmpeg};
pub use engine::{AudioTurn, ChatbotConfig, ChatbotEngine, FALLBACK_REPLY};
pub use message::{Message, Role};
pub use session::{SessionState, SessionStore};
pub use telegram::TelegramClient;
pub use whisper::{OpenAiTranscriber, Transcriber, Transcription, Whisper};
