//! Command handler implementations (/start, /help, /cancel and admin commands)

use teloxide::prelude::*;
use teloxide::types::{Message, ParseMode};

use super::types::{register_sender, HandlerDeps, HandlerError, Sender};
use crate::i18n::{self, Language};
use crate::storage::db;
use crate::storage::get_connection;
use crate::telegram::admin;
use crate::telegram::bot::Command;
use crate::telegram::menu::send_welcome;
use crate::telegram::notifications::notify_admins_new_user;
use crate::telegram::Bot;

/// Handle /start command
pub(super) async fn handle_start_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let Some(sender) = Sender::from_message(msg) else {
        return Ok(());
    };
    deps.sessions.clear(sender.id).await;

    let lang = match register_sender(&deps.db_pool, &sender) {
        Ok(registration) => {
            if registration.is_new {
                // New user - tell the admins in the background
                let bot_notify = bot.clone();
                let db_pool = deps.db_pool.clone();
                let admins = deps.admins.clone();
                let user = registration.user.clone();
                tokio::spawn(async move {
                    notify_admins_new_user(&bot_notify, &db_pool, &admins, &user).await;
                });
            }
            Language::from_code_or_default(&registration.user.language)
        }
        Err(e) => {
            log::error!("Failed to register user {}: {}", sender.id, e);
            Language::default()
        }
    };

    send_welcome(bot, msg.chat.id, lang).await?;
    Ok(())
}

async fn handle_help_command(bot: &Bot, msg: &Message, lang: Language) -> Result<(), HandlerError> {
    bot.send_message(msg.chat.id, i18n::t(lang, "help-text")).await?;
    Ok(())
}

async fn handle_cancel_command(bot: &Bot, msg: &Message, deps: &HandlerDeps, lang: Language) -> Result<(), HandlerError> {
    if let Some(sender) = Sender::from_message(msg) {
        deps.sessions.clear(sender.id).await;
    }
    bot.send_message(msg.chat.id, i18n::t(lang, "cancelled"))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Stores the phone number of a user who shared their own contact.
pub(super) async fn handle_contact(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let (Some(sender), Some(contact)) = (Sender::from_message(msg), msg.contact()) else {
        return Ok(());
    };
    if contact.user_id.and_then(|id| i64::try_from(id.0).ok()) != Some(sender.id) {
        log::debug!("Ignoring contact of someone else from {}", sender.id);
        return Ok(());
    }

    {
        let conn = get_connection(&deps.db_pool)?;
        db::get_or_create_user(&conn, sender.id, sender.username.as_deref(), Some(&sender.full_name))?;
        db::set_user_phone(&conn, sender.id, &contact.phone_number)?;
    }
    log::info!("📱 Phone number saved for user {}", sender.id);

    let lang = i18n::user_lang_from_pool(&deps.db_pool, sender.id);
    bot.send_message(msg.chat.id, i18n::t(lang, "phone-saved")).await?;
    Ok(())
}

/// Dispatches a parsed bot command.
pub(super) async fn handle_command(bot: &Bot, msg: &Message, cmd: Command, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let user_id = msg.from.as_ref().and_then(|u| i64::try_from(u.id.0).ok()).unwrap_or(0);
    let lang = i18n::user_lang_from_pool(&deps.db_pool, user_id);
    let chat_id = msg.chat.id;

    match cmd {
        Command::Start => return handle_start_command(bot, msg, deps).await,
        Command::Help => return handle_help_command(bot, msg, lang).await,
        Command::Cancel => return handle_cancel_command(bot, msg, deps, lang).await,
        _ => {}
    }

    if !admin::ensure_admin(bot, deps, chat_id, user_id).await? {
        return Ok(());
    }

    match cmd {
        Command::Admin => admin::show_admin_panel(bot, chat_id, None).await?,
        Command::Allusers => admin::send_users_list(bot, deps, chat_id).await?,
        Command::Stats => admin::send_stats(bot, deps, chat_id).await?,
        Command::Reklama => admin::start_broadcast(bot, deps, chat_id, user_id).await?,
        Command::Backup => admin::send_backup(bot, chat_id).await?,
        Command::Cleandb => admin::confirm_clean_database(bot, chat_id).await?,
        Command::Admins => admin::send_admin_list(bot, deps, chat_id).await?,
        Command::Start | Command::Help | Command::Cancel => {}
    }
    Ok(())
}
