//! Bot initialization
//!
//! This module contains:
//! - Command enum definition
//! - Bot instance creation
//! - Command list shown in the Telegram UI
//! - Waiting for the Bot API on startup

use std::time::Duration;

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::utils::command::BotCommands;
use teloxide::RequestError;
use tokio::time::sleep;

use crate::core::config;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Buyruqlar:")]
pub enum Command {
    #[command(description = "botni ishga tushirish")]
    Start,
    #[command(description = "yordam")]
    Help,
    #[command(description = "joriy amalni bekor qilish")]
    Cancel,
    #[command(description = "admin panel")]
    Admin,
    #[command(description = "barcha foydalanuvchilar")]
    Allusers,
    #[command(description = "statistika")]
    Stats,
    #[command(description = "reklama yuborish")]
    Reklama,
    #[command(description = "bazani zaxiralash")]
    Backup,
    #[command(description = "bazani tozalash")]
    Cleandb,
    #[command(description = "adminlar ro'yxati")]
    Admins,
}

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Failed to create bot (invalid URL, missing token, etc.)
pub fn create_bot() -> anyhow::Result<Bot> {
    let token = config::BOT_TOKEN.clone();
    if token.is_empty() {
        anyhow::bail!("BOT_TOKEN is not set");
    }

    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = Bot::with_client(token, client);

    // Check if local Bot API server is configured
    let bot = match config::BOT_API_URL.as_deref() {
        Some(bot_api_url) => {
            log::info!("Using custom Bot API URL: {}", bot_api_url);
            let url = url::Url::parse(bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
            bot.set_api_url(url)
        }
        None => bot,
    };

    Ok(bot)
}

/// Sets up bot commands in Telegram UI
///
/// Only the public commands are listed; admin commands stay hidden.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::types::BotCommand;

    bot.set_my_commands(vec![
        BotCommand::new("start", "Botni ishga tushirish"),
        BotCommand::new("help", "Yordam"),
        BotCommand::new("cancel", "Joriy amalni bekor qilish"),
    ])
    .await?;

    Ok(())
}

/// How long to wait before asking the Bot API again, or `None` when retrying cannot help
///
/// A local Bot API server may still be starting (connection refused, timeouts)
/// or ask us to slow down. API errors such as an invalid token are final.
pub fn startup_retry_delay(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(seconds) => Some(seconds.duration()),
        RequestError::Network(_) | RequestError::Io(_) => Some(config::retry::startup_delay()),
        _ => None,
    }
}

/// Calls `getMe` until the Bot API answers
pub async fn wait_for_bot_api(bot: &Bot) -> anyhow::Result<Me> {
    let max_attempts = config::retry::STARTUP_MAX_RETRIES;
    let mut attempt = 1;
    loop {
        let error = match bot.get_me().await {
            Ok(me) => return Ok(me),
            Err(e) => e,
        };

        match startup_retry_delay(&error) {
            Some(delay) if attempt < max_attempts => {
                log::warn!(
                    "Bot API not ready (attempt {}/{}): {}. Retrying in {}s...",
                    attempt,
                    max_attempts,
                    error,
                    delay.as_secs()
                );
                sleep(delay).await;
                attempt += 1;
            }
            _ => anyhow::bail!("Failed to connect to Bot API after {} attempts: {}", attempt, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_descriptions() {
        let descriptions = Command::descriptions().to_string();
        assert!(descriptions.contains("/start"));
        assert!(descriptions.contains("/reklama"));
        assert!(descriptions.contains("/cleandb"));
        assert!(descriptions.contains("/allusers"));
    }

    #[test]
    fn test_command_parsing() {
        assert!(matches!(Command::parse("/start", "kiuf_bot"), Ok(Command::Start)));
        assert!(matches!(Command::parse("/allusers", "kiuf_bot"), Ok(Command::Allusers)));
        assert!(matches!(Command::parse("/admins@kiuf_bot", "kiuf_bot"), Ok(Command::Admins)));
        assert!(Command::parse("/unknown", "kiuf_bot").is_err());
    }

    #[test]
    fn test_startup_retry_delay() {
        use std::sync::Arc;
        use teloxide::types::Seconds;
        use teloxide::ApiError;

        let refused = RequestError::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )));
        assert_eq!(startup_retry_delay(&refused), Some(Duration::from_secs(5)));

        let flood = RequestError::RetryAfter(Seconds::from_seconds(7));
        assert_eq!(startup_retry_delay(&flood), Some(Duration::from_secs(7)));

        assert_eq!(startup_retry_delay(&RequestError::Api(ApiError::InvalidToken)), None);
    }
}
