//! Telegram client using teloxide.

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, ParseMode};
use teloxide::{ApiError, RequestError};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::chatbot::audio::AudioFetcher;

/// Escape a string for Telegram's HTML parse mode.
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            _ => result.push(c),
        }
    }
    result
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send a reply with Markdown formatting.
    ///
    /// Model output doesn't always parse as Telegram Markdown; when Telegram
    /// rejects the entities the same text goes out unformatted instead.
    pub async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<i32, String> {
        let result = self
            .bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Markdown)
            .await;

        let result = match result {
            Err(RequestError::Api(ApiError::CantParseEntities(reason))) => {
                warn!("Markdown rejected ({reason}), sending plain text");
                self.bot.send_message(chat_id, text).await
            }
            other => other,
        };

        result.map(|msg| msg.id.0).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Echo a transcript back to the user in italics.
    pub async fn send_transcript(&self, chat_id: ChatId, transcript: &str) -> Result<i32, String> {
        let text = format!("<i>{}</i>", html_escape(transcript));
        self.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|msg| msg.id.0)
            .map_err(|e| {
                let msg = format!("Failed to send transcript: {e}");
                warn!("{}", msg);
                msg
            })
    }
}

impl AudioFetcher for TelegramClient {
    async fn fetch(&self, file_id: &str, dst: &mut tokio::fs::File) -> Result<u64, String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        self.bot
            .download_file(&file.path, &mut *dst)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;
        dst.flush().await.map_err(|e| format!("Failed to write file: {e}"))?;

        let size = dst
            .metadata()
            .await
            .map_err(|e| format!("Failed to stat file: {e}"))?
            .len();

        info!("📥 Downloaded audio {} ({} bytes)", file.path, size);
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("hello"), "hello");
        assert_eq!(html_escape("<b>"), "&lt;b&gt;");
        assert_eq!(html_escape("a & b"), "a &amp; b");
    }

    #[test]
    fn test_html_escape_keeps_markdown_chars() {
        assert_eq!(html_escape("snake_case *bold*"), "snake_case *bold*");
    }

    #[test]
    fn test_cannot_close_italic_early() {
        let escaped = html_escape("</i><b>pwned");
        assert!(!escaped.contains("</i>"));
    }
}
