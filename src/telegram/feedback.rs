//! Feedback functionality for the bot
//!
//! A user presses the feedback button, writes one message, and every admin
//! receives a notification with the user's details followed by a copy of the
//! message. Admins answer by replying to either of the two.

use fluent_templates::fluent_bundle::FluentArgs;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html;

use crate::core::config::admin::AdminList;
use crate::i18n::{self, Language};
use crate::storage::db::DbPool;
use crate::telegram::handlers::types::{HandlerDeps, HandlerError, Sender};
use crate::telegram::menu::{back_keyboard, replace_screen};
use crate::telegram::notifications::{remember_thread, reply_keyboard, username_or_none};
use crate::telegram::relay::{OutgoingMessage, Transport};
use crate::telegram::session::PendingInput;
use crate::telegram::Bot;

/// One piece of feedback, ready to be fanned out to the admins.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSubmission {
    pub user_id: i64,
    pub full_name: String,
    pub username: Option<String>,
    /// Copy of the user's message (text or one attachment)
    pub content: OutgoingMessage,
}

/// Header text of the admin notification. Carries the id markers the reply
/// correlator reads.
pub fn feedback_notification_text(lang: Language, user_id: i64, full_name: &str, username: Option<&str>) -> String {
    let mut args = FluentArgs::new();
    args.set("full_name", html::escape(full_name));
    args.set("user_id", user_id.to_string());
    args.set("username", username_or_none(lang, username));
    i18n::t_args(lang, "feedback-notification", &args)
}

/// Shows the feedback prompt and waits for the user's next message.
pub async fn start_feedback(
    bot: &Bot,
    deps: &HandlerDeps,
    chat_id: ChatId,
    current: Option<&Message>,
    user_id: i64,
    lang: Language,
) -> Result<(), HandlerError> {
    deps.sessions.set(user_id, PendingInput::Feedback).await;
    replace_screen(bot, chat_id, current, i18n::t(lang, "feedback-prompt"), back_keyboard(lang)).await?;
    Ok(())
}

/// Sends the notification and the copied content to every admin.
///
/// Both bot messages get a thread key so replies to either can be correlated.
/// Returns the number of admins that received the notification.
pub async fn deliver_feedback<T>(
    transport: &T,
    db_pool: &DbPool,
    admins: &AdminList,
    submission: &FeedbackSubmission,
) -> usize
where
    T: Transport + ?Sized,
{
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("💬 FEEDBACK RECEIVED");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("  • User ID: {}", submission.user_id);
    log::info!("  • Username: {}", submission.username.as_deref().unwrap_or("N/A"));
    log::info!("  • Name: {}", submission.full_name);
    log::info!(
        "  • Content: {}",
        submission.content.attachment.as_ref().map(|a| a.kind()).unwrap_or("text")
    );

    let lang = i18n::admin_lang();
    let notification = OutgoingMessage::html(feedback_notification_text(
        lang,
        submission.user_id,
        &submission.full_name,
        submission.username.as_deref(),
    ))
    .with_keyboard(reply_keyboard(lang, submission.user_id));

    let mut delivered = 0;
    for &admin_id in admins.ids() {
        let chat_id = ChatId(admin_id);
        let header_id = match transport.deliver(chat_id, &notification).await {
            Ok(id) => id,
            Err(e) => {
                log::error!("Failed to send feedback notification to admin {}: {}", admin_id, e);
                continue;
            }
        };
        remember_thread(db_pool, chat_id, header_id, submission.user_id);
        delivered += 1;

        let copy = submission.content.clone().reply_to(header_id);
        match transport.deliver(chat_id, &copy).await {
            Ok(copy_id) => remember_thread(db_pool, chat_id, copy_id, submission.user_id),
            Err(e) => log::error!("Failed to copy feedback content to admin {}: {}", admin_id, e),
        }
    }

    log::info!("✅ Feedback delivered to {}/{} admins", delivered, admins.ids().len());
    delivered
}

/// Handles the message a user wrote after pressing the feedback button.
pub async fn submit_feedback(bot: &Bot, deps: &HandlerDeps, msg: &Message, lang: Language) -> Result<(), HandlerError> {
    let Some(sender) = Sender::from_message(msg) else {
        return Ok(());
    };

    let Some(content) = OutgoingMessage::copy_of(msg) else {
        // Stickers, polls and the like cannot be relayed; ask again.
        deps.sessions.set(sender.id, PendingInput::Feedback).await;
        bot.send_message(msg.chat.id, i18n::t(lang, "feedback-prompt"))
            .parse_mode(ParseMode::Html)
            .await?;
        return Ok(());
    };

    let submission = FeedbackSubmission {
        user_id: sender.id,
        full_name: sender.full_name.clone(),
        username: sender.username.clone(),
        content,
    };

    let delivered = deliver_feedback(bot, &deps.db_pool, &deps.admins, &submission).await;
    let reply_key = if delivered > 0 || deps.admins.is_empty() {
        "feedback-sent"
    } else {
        "error-generic"
    };

    bot.send_message(msg.chat.id, i18n::t(lang, reply_key))
        .parse_mode(ParseMode::Html)
        .reply_markup(back_keyboard(lang))
        .await?;
    Ok(())
}
