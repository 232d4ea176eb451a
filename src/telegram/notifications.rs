//! Notifications sent to administrators

use fluent_templates::fluent_bundle::FluentArgs;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MessageId};
use teloxide::utils::html;

use crate::core::config::admin::AdminList;
use crate::i18n::{self, Language};
use crate::storage::db::{self, DbPool, User};
use crate::telegram::menu::{action_button, CallbackAction};
use crate::telegram::relay::{OutgoingMessage, Transport};

/// Keyboard with the "reply" button attached to every notification about a user.
pub fn reply_keyboard(lang: Language, user_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![action_button(
        i18n::t(lang, "btn-reply-user"),
        CallbackAction::ReplyUser(user_id),
    )]])
}

/// `@username` or the localized "none" marker, HTML-escaped.
pub fn username_or_none(lang: Language, username: Option<&str>) -> String {
    match username {
        Some(name) if !name.is_empty() => html::escape(&format!("@{}", name)),
        _ => i18n::t(lang, "none-value"),
    }
}

/// Stores which user a bot message in an admin chat belongs to.
///
/// Failures are only logged: the text markers still allow correlation.
pub fn remember_thread(db_pool: &DbPool, chat_id: ChatId, message_id: MessageId, user_id: i64) {
    let result = db::get_connection(db_pool)
        .map_err(crate::core::AppError::from)
        .and_then(|conn| Ok(db::record_thread_message(&conn, chat_id.0, message_id.0, user_id)?));
    if let Err(e) = result {
        log::warn!(
            "Failed to record thread key chat={} message={} user={}: {}",
            chat_id,
            message_id.0,
            user_id,
            e
        );
    }
}

/// Looks up the user recorded for a bot message, if any.
pub fn recorded_thread_user(db_pool: &DbPool, chat_id: ChatId, message_id: MessageId) -> Option<i64> {
    let conn = match db::get_connection(db_pool) {
        Ok(conn) => conn,
        Err(e) => {
            log::warn!("Failed to get DB connection for thread lookup: {}", e);
            return None;
        }
    };
    match db::find_thread_user(&conn, chat_id.0, message_id.0) {
        Ok(user_id) => user_id,
        Err(e) => {
            log::warn!("Thread lookup failed for chat={} message={}: {}", chat_id, message_id.0, e);
            None
        }
    }
}

pub fn new_user_notification_text(lang: Language, user: &User) -> String {
    let mut args = FluentArgs::new();
    args.set("full_name", html::escape(user.full_name.as_deref().unwrap_or("-")));
    args.set("user_id", user.telegram_id.to_string());
    args.set(
        "phone",
        user.phone_number
            .as_deref()
            .map(html::escape)
            .unwrap_or_else(|| i18n::t(lang, "none-value")),
    );
    args.set("username", username_or_none(lang, user.username.as_deref()));
    args.set("time", user.created_at.clone());
    i18n::t_args(lang, "new-user-notification", &args)
}

/// Tells every admin about a newly registered user.
///
/// Returns how many admins were reached. Per-admin failures are logged and skipped.
pub async fn notify_admins_new_user<T>(transport: &T, db_pool: &DbPool, admins: &AdminList, user: &User) -> usize
where
    T: Transport + ?Sized,
{
    let lang = i18n::admin_lang();
    let message = OutgoingMessage::html(new_user_notification_text(lang, user))
        .with_keyboard(reply_keyboard(lang, user.telegram_id));

    let mut delivered = 0;
    for &admin_id in admins.ids() {
        let chat_id = ChatId(admin_id);
        match transport.deliver(chat_id, &message).await {
            Ok(message_id) => {
                remember_thread(db_pool, chat_id, message_id, user.telegram_id);
                delivered += 1;
            }
            Err(e) => log::error!("Failed to notify admin {} about new user: {}", admin_id, e),
        }
    }

    log::info!(
        "🆕 New user {} announced to {}/{} admins",
        user.telegram_id,
        delivered,
        admins.ids().len()
    );
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 1,
            telegram_id: 4242,
            username: None,
            full_name: Some("Ali <Valiyev>".to_string()),
            phone_number: None,
            language: "uz".to_string(),
            created_at: "2025-06-01 10:00:00".to_string(),
            updated_at: "2025-06-01 10:00:00".to_string(),
        }
    }

    #[test]
    fn new_user_text_escapes_and_embeds_id() {
        let text = new_user_notification_text(Language::En, &user());
        assert!(text.contains("Ali &lt;Valiyev&gt;"));
        assert!(text.contains("🆔 <b>Telegram ID:</b> <code>4242</code>"));
        assert!(text.contains("❌ None"));
        assert_eq!(crate::telegram::correlator::scan_markers(&text), Some(4242));
    }

    #[test]
    fn username_marker() {
        assert_eq!(username_or_none(Language::En, Some("ali_v")), "@ali_v");
        assert_eq!(username_or_none(Language::Ru, None), "❌ Нет");
    }

    #[test]
    fn reply_keyboard_carries_user_id() {
        let keyboard = reply_keyboard(Language::Uz, 77);
        let button = &keyboard.inline_keyboard[0][0];
        assert_eq!(button.text, "📩 Javob berish");
    }
}
