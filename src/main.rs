use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use personabot::chatbot::{ChatbotEngine, OpenAiTranscriber, TelegramClient, Transcription, Whisper};
use personabot::config::Config;
use personabot::openai;

const AUDIO_ERROR_NOTICE: &str = "Sorry, I couldn't process that audio message.";

type Engine = ChatbotEngine<openai::Client, Transcription>;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "start the conversation over.")]
    Start,
}

struct BotState {
    engine: Engine,
    telegram: TelegramClient,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "personabot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("personabot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting personabot...");
    info!("Loaded config from {config_path}");
    info!(
        "Persona: {} (from {}), model: {}, window: {}",
        config.persona,
        config.profiles_dir.display(),
        config.model,
        config.context_window
    );

    let transcription = match config.whisper_model_path {
        Some(ref path) => match Whisper::new(path) {
            Ok(whisper) => {
                info!("Voice transcription: local Whisper");
                Transcription::Local(whisper)
            }
            Err(e) => {
                error!("Failed to load Whisper model: {e}");
                std::process::exit(1);
            }
        },
        None => {
            info!("Voice transcription: {}", config.transcription_model);
            Transcription::Hosted(OpenAiTranscriber::new(
                config.openai_api_key.clone(),
                config.openai_base_url.clone(),
                config.transcription_model.clone(),
            ))
        }
    };

    let llm = openai::Client::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.model.clone(),
    );

    let bot = Bot::new(&config.telegram_bot_token);
    let state = Arc::new(BotState {
        engine: ChatbotEngine::new(config.chatbot_config(), llm, transcription),
        telegram: TelegramClient::new(bot.clone()),
    });

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(msg: Message, cmd: Command, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(ref user) = msg.from else {
        return Ok(());
    };

    match cmd {
        Command::Start => {
            let greeting = state.engine.reset(user.id.0 as i64).await;
            state.telegram.send_message(msg.chat.id, &greeting).await.ok();
        }
    }

    Ok(())
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(ref user) = msg.from else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;

    let file_id = msg
        .voice()
        .map(|v| v.file.id.clone())
        .or_else(|| msg.audio().map(|a| a.file.id.clone()));

    if let Some(file_id) = file_id {
        match state
            .engine
            .handle_audio_turn(user_id, &state.telegram, &file_id.0)
            .await
        {
            Ok(turn) => {
                state.telegram.send_transcript(msg.chat.id, &turn.transcript).await.ok();
                state.telegram.send_message(msg.chat.id, &turn.reply).await.ok();
            }
            Err(e) => {
                warn!("Audio from {} failed: {}", user_id, e);
                state.telegram.send_message(msg.chat.id, AUDIO_ERROR_NOTICE).await.ok();
            }
        }
        return Ok(());
    }

    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    // Unknown commands fall through the command branch; don't feed them to the model
    if text.starts_with('/') {
        return Ok(());
    }

    let reply = state.engine.handle_turn(user_id, text).await;
    state.telegram.send_message(msg.chat.id, &reply).await.ok();

    Ok(())
}
