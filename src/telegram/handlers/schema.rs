//! Dispatcher schema and handler chain builders

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;

use super::commands::{handle_command, handle_contact};
use super::types::{HandlerDeps, HandlerError, Sender};
use crate::i18n;
use crate::telegram::bot::Command;
use crate::telegram::menu::{handle_callback, send_main_menu};
use crate::telegram::session::PendingInput;
use crate::telegram::{admin, feedback, Bot};

/// Creates the main dispatcher schema for the Telegram bot.
///
/// The same schema is used in production and can be used in integration tests.
/// Only private chats are served; group updates fall through unhandled.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_commands = deps.clone();
    let deps_messages = deps.clone();
    let deps_callback = deps;

    dptree::entry()
        // Command handler
        .branch(command_handler(deps_commands))
        // Pending input, admin replies, contacts
        .branch(message_handler(deps_messages))
        // Callback query handler
        .branch(callback_handler(deps_callback))
}

fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.chat.is_private())
        .branch(dptree::entry().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let deps = deps.clone();
                async move {
                    log::info!("🎯 Received command: {:?} from chat {}", cmd, msg.chat.id);
                    if let Err(e) = handle_command(&bot, &msg, cmd, &deps).await {
                        log::error!("❌ Command failed in chat {}: {}", msg.chat.id, e);
                    }
                    Ok(())
                }
            },
        ))
}

fn message_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.chat.is_private())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                if let Err(e) = handle_message(&bot, &msg, &deps).await {
                    log::error!("❌ Message handler failed in chat {}: {}", msg.chat.id, e);
                    let lang = i18n::user_lang_from_pool(&deps.db_pool, msg.chat.id.0);
                    let _ = bot.send_message(msg.chat.id, i18n::t(lang, "error-generic")).await;
                }
                Ok(())
            }
        })
}

/// Routes a non-command private message.
///
/// Order: pending input of the sender, admin reply to a thread, shared
/// contact, otherwise the main menu.
async fn handle_message(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let Some(sender) = Sender::from_message(msg) else {
        return Ok(());
    };
    let is_admin = deps.is_admin(sender.id);

    if let Some(pending) = deps.sessions.take(sender.id).await {
        log::debug!("Pending input {:?} consumed for user {}", pending, sender.id);
        match pending {
            PendingInput::Feedback => {
                let lang = i18n::user_lang_from_pool(&deps.db_pool, sender.id);
                return feedback::submit_feedback(bot, deps, msg, lang).await;
            }
            PendingInput::Broadcast if is_admin => return admin::run_broadcast(bot, deps, msg).await,
            PendingInput::ReplyTo(user_id) if is_admin => {
                return admin::relay_pending_reply(bot, deps, msg, user_id).await
            }
            other => log::warn!("Dropping admin-only input {:?} of non-admin {}", other, sender.id),
        }
    }

    if is_admin && msg.reply_to_message().is_some() {
        return admin::relay_thread_reply(bot, deps, msg).await;
    }

    if msg.contact().is_some() {
        return handle_contact(bot, msg, deps).await;
    }

    let lang = i18n::user_lang_from_pool(&deps.db_pool, sender.id);
    send_main_menu(bot, msg.chat.id, lang).await?;
    Ok(())
}

fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
        let deps = deps.clone();
        async move {
            let query_id = q.id.clone();
            if let Err(e) = handle_callback(bot, q, deps).await {
                log::error!("❌ Callback {} failed: {}", query_id, e);
            }
            Ok(())
        }
    })
}
