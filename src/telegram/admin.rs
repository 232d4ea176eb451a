//! Admin functionality for the Telegram bot
//!
//! This module contains all admin-related commands and utilities:
//! - Admin panel, user list and statistics
//! - Broadcast, CSV export, database backup and cleanup
//! - Replies to users (via the reply button or by replying to a notification)

use std::path::Path;

use chrono::Utc;
use fluent_templates::fluent_bundle::FluentArgs;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, InputFile, MessageId, ParseMode, ReplyParameters};
use teloxide::utils::html;

use crate::core::config;
use crate::core::export::{users_to_csv, EXPORT_FILE_NAME};
use crate::i18n::{self, Language};
use crate::storage::backup::{create_backup, file_size_mb};
use crate::storage::db::{self, User, UserStats};
use crate::telegram::correlator::ThreadMessage;
use crate::telegram::handlers::types::{HandlerDeps, HandlerError};
use crate::telegram::menu::{action_button, replace_screen, AdminAction, CallbackAction};
use crate::telegram::notifications::{recorded_thread_user, username_or_none};
use crate::telegram::relay::{
    broadcast, relay_admin_reply, reply_to_thread, AdminReply, Delivery, OutgoingMessage, RelayError,
};
use crate::telegram::session::PendingInput;
use crate::telegram::Bot;

/// Sends the "no permission" answer when `user_id` is not an admin.
///
/// Returns whether the caller may continue.
pub async fn ensure_admin(bot: &Bot, deps: &HandlerDeps, chat_id: ChatId, user_id: i64) -> ResponseResult<bool> {
    if deps.is_admin(user_id) {
        return Ok(true);
    }
    log::warn!("User {} tried to use an admin action without permission", user_id);
    let lang = i18n::user_lang_from_pool(&deps.db_pool, user_id);
    bot.send_message(chat_id, i18n::t(lang, "admin-no-permission")).await?;
    Ok(false)
}

pub fn admin_panel_keyboard(lang: Language) -> InlineKeyboardMarkup {
    let button = |key: &str, action: AdminAction| action_button(i18n::t(lang, key), CallbackAction::Admin(action));
    InlineKeyboardMarkup::new(vec![
        vec![
            button("admin-btn-users", AdminAction::Users),
            button("admin-btn-stats", AdminAction::Stats),
        ],
        vec![button("admin-btn-broadcast", AdminAction::Broadcast)],
        vec![
            button("admin-btn-export", AdminAction::Export),
            button("admin-btn-backup", AdminAction::Backup),
        ],
        vec![
            button("admin-btn-cleandb", AdminAction::CleanDb),
            button("admin-btn-admins", AdminAction::Admins),
        ],
    ])
}

fn back_to_panel_keyboard(lang: Language) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![action_button(
        i18n::t(lang, "admin-btn-back"),
        CallbackAction::Admin(AdminAction::Back),
    )]])
}

/// Shows the admin panel, editing `current` when possible.
pub async fn show_admin_panel(bot: &Bot, chat_id: ChatId, current: Option<&Message>) -> ResponseResult<()> {
    let lang = i18n::admin_lang();
    replace_screen(bot, chat_id, current, i18n::t(lang, "admin-panel"), admin_panel_keyboard(lang)).await
}

/// Renders the user list page. Lines that would overflow a Telegram message
/// are dropped and counted in the "and N more" footer.
pub fn users_list_text(lang: Language, total: i64, users: &[User]) -> String {
    if total == 0 || users.is_empty() {
        return i18n::t(lang, "admin-users-empty");
    }

    let mut args = FluentArgs::new();
    args.set("total", total.to_string());
    let mut text = i18n::t_args(lang, "admin-users-header", &args);
    text.push_str("\n\n");

    let footer_reserve = 100;
    let mut shown: i64 = 0;
    for (idx, user) in users.iter().enumerate() {
        let line = format!(
            "{}. <b>{}</b>\n   🆔 <code>{}</code> | {}\n   📱 {} | 🕐 {}\n\n",
            idx + 1,
            html::escape(&user.display_name()),
            user.telegram_id,
            username_or_none(lang, user.username.as_deref()),
            user.phone_number
                .as_deref()
                .map(html::escape)
                .unwrap_or_else(|| i18n::t(lang, "none-value")),
            user.created_at
        );
        if text.len() + line.len() + footer_reserve > config::panel::MAX_MESSAGE_LENGTH {
            break;
        }
        text.push_str(&line);
        shown += 1;
    }

    if total > shown {
        let mut args = FluentArgs::new();
        args.set("count", (total - shown).to_string());
        text.push_str(&i18n::t_args(lang, "admin-users-more", &args));
    }

    text
}

pub async fn send_users_list(bot: &Bot, deps: &HandlerDeps, chat_id: ChatId) -> Result<(), HandlerError> {
    let lang = i18n::admin_lang();
    let (total, users) = {
        let conn = db::get_connection(&deps.db_pool)?;
        (
            db::count_users(&conn)?,
            db::get_users_page(&conn, config::panel::USERS_PAGE_SIZE)?,
        )
    };
    log::debug!("Found {} users in database", total);

    bot.send_message(chat_id, users_list_text(lang, total, &users))
        .parse_mode(ParseMode::Html)
        .reply_markup(back_to_panel_keyboard(lang))
        .await?;
    Ok(())
}

pub fn stats_text(lang: Language, stats: &UserStats, generated_at: &str) -> String {
    let mut args = FluentArgs::new();
    args.set("total", stats.total.to_string());
    args.set("today", stats.today.to_string());
    args.set("week", stats.last_7_days.to_string());
    args.set("month", stats.last_30_days.to_string());
    args.set("with_phone", stats.with_phone.to_string());
    args.set("with_username", stats.with_username.to_string());
    args.set("time", generated_at.to_string());
    i18n::t_args(lang, "admin-stats", &args)
}

pub async fn send_stats(bot: &Bot, deps: &HandlerDeps, chat_id: ChatId) -> Result<(), HandlerError> {
    let lang = i18n::admin_lang();
    let stats = {
        let conn = db::get_connection(&deps.db_pool)?;
        db::get_user_stats(&conn)?
    };
    let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    bot.send_message(chat_id, stats_text(lang, &stats, &now))
        .parse_mode(ParseMode::Html)
        .reply_markup(back_to_panel_keyboard(lang))
        .await?;
    Ok(())
}

/// Asks for the post to broadcast and waits for the admin's next message.
pub async fn start_broadcast(bot: &Bot, deps: &HandlerDeps, chat_id: ChatId, admin_id: i64) -> ResponseResult<()> {
    deps.sessions.set(admin_id, PendingInput::Broadcast).await;
    bot.send_message(chat_id, i18n::t(i18n::admin_lang(), "admin-broadcast-prompt"))
        .await?;
    Ok(())
}

/// Broadcasts `msg` to every registered user and reports the result.
pub async fn run_broadcast(bot: &Bot, deps: &HandlerDeps, msg: &Message) -> Result<(), HandlerError> {
    let lang = i18n::admin_lang();
    let Some(content) = OutgoingMessage::copy_of(msg) else {
        bot.send_message(msg.chat.id, i18n::t(lang, "error-generic")).await?;
        return Ok(());
    };

    let recipients = {
        let conn = db::get_connection(&deps.db_pool)?;
        db::get_all_user_ids(&conn)?
    };
    log::info!("📢 Broadcast started by {} to {} users", msg.chat.id, recipients.len());
    bot.send_message(msg.chat.id, i18n::t(lang, "admin-broadcast-started"))
        .await?;

    let report = broadcast(bot, &recipients, &content, deps.broadcast_delay).await;

    let mut args = FluentArgs::new();
    args.set("success", report.success.to_string());
    args.set("failed", report.failed.to_string());
    args.set("total", report.total.to_string());
    bot.send_message(msg.chat.id, i18n::t_args(lang, "admin-broadcast-report", &args))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

pub async fn send_export(bot: &Bot, deps: &HandlerDeps, chat_id: ChatId) -> Result<(), HandlerError> {
    let lang = i18n::admin_lang();
    let users = {
        let conn = db::get_connection(&deps.db_pool)?;
        db::get_all_users(&conn)?
    };

    let mut args = FluentArgs::new();
    args.set("total", users.len().to_string());
    let file = InputFile::memory(users_to_csv(&users).into_bytes()).file_name(EXPORT_FILE_NAME);

    bot.send_document(chat_id, file)
        .caption(i18n::t_args(lang, "admin-export-caption", &args))
        .parse_mode(ParseMode::Html)
        .await?;
    log::info!("📥 Exported {} users to admin {}", users.len(), chat_id);
    Ok(())
}

pub async fn send_backup(bot: &Bot, chat_id: ChatId) -> Result<(), HandlerError> {
    let lang = i18n::admin_lang();
    let backup_dir = Path::new(config::backup::BACKUP_DIR.as_str());

    let backup_path = match create_backup(&config::DATABASE_PATH, backup_dir) {
        Ok(path) => path,
        Err(e) => {
            log::error!("❌ Backup failed: {:#}", e);
            let mut args = FluentArgs::new();
            args.set("error", html::escape(&e.to_string()));
            bot.send_message(chat_id, i18n::t_args(lang, "admin-backup-failed", &args))
                .await?;
            return Ok(());
        }
    };

    let mut args = FluentArgs::new();
    args.set(
        "file",
        html::escape(
            &backup_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
    );
    args.set("size", format!("{:.2}", file_size_mb(&backup_path).unwrap_or(0.0)));
    args.set("time", Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string());

    bot.send_document(chat_id, InputFile::file(backup_path.clone()))
        .caption(i18n::t_args(lang, "admin-backup-caption", &args))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

pub async fn confirm_clean_database(bot: &Bot, chat_id: ChatId) -> ResponseResult<()> {
    let lang = i18n::admin_lang();
    let keyboard = InlineKeyboardMarkup::new(vec![vec![
        action_button(i18n::t(lang, "btn-yes"), CallbackAction::CleanDbConfirm(true)),
        action_button(i18n::t(lang, "btn-no"), CallbackAction::CleanDbConfirm(false)),
    ]]);
    bot.send_message(chat_id, i18n::t(lang, "admin-cleandb-confirm"))
        .reply_markup(keyboard)
        .await?;
    Ok(())
}

async fn clean_database(
    bot: &Bot,
    deps: &HandlerDeps,
    chat_id: ChatId,
    current: Option<&Message>,
    confirmed: bool,
) -> Result<(), HandlerError> {
    let lang = i18n::admin_lang();
    if !confirmed {
        replace_screen(
            bot,
            chat_id,
            current,
            i18n::t(lang, "cancelled"),
            back_to_panel_keyboard(lang),
        )
        .await?;
        return Ok(());
    }

    let deleted = {
        let mut conn = db::get_connection(&deps.db_pool)?;
        db::delete_all_users(&mut conn)?
    };
    log::warn!("🗑️ Database cleaned by admin {}: {} users deleted", chat_id, deleted);

    let mut args = FluentArgs::new();
    args.set("count", deleted.to_string());
    replace_screen(
        bot,
        chat_id,
        current,
        i18n::t_args(lang, "admin-cleandb-done", &args),
        back_to_panel_keyboard(lang),
    )
    .await?;
    Ok(())
}

pub async fn send_admin_list(bot: &Bot, deps: &HandlerDeps, chat_id: ChatId) -> Result<(), HandlerError> {
    let lang = i18n::admin_lang();
    let mut text = i18n::t(lang, "admin-list-header");
    text.push_str("\n\n");

    if deps.admins.is_empty() {
        text.push_str(&i18n::t(lang, "admin-list-empty"));
    } else {
        let conn = db::get_connection(&deps.db_pool)?;
        for (idx, &admin_id) in deps.admins.ids().iter().enumerate() {
            let known = db::get_user(&conn, admin_id)?;
            let name = known
                .as_ref()
                .map(|u| html::escape(&u.display_name()))
                .unwrap_or_else(|| "-".to_string());
            let username = username_or_none(lang, known.as_ref().and_then(|u| u.username.as_deref()));
            text.push_str(&format!(
                "{}. <code>{}</code> - {} ({})\n",
                idx + 1,
                admin_id,
                name,
                username
            ));
        }
    }
    text.push('\n');
    text.push_str(&i18n::t(lang, "admin-list-hint"));

    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(back_to_panel_keyboard(lang))
        .await?;
    Ok(())
}

/// Reply button pressed: show who the reply goes to and wait for the text.
async fn start_reply(
    bot: &Bot,
    deps: &HandlerDeps,
    chat_id: ChatId,
    admin_id: i64,
    user_id: i64,
) -> Result<(), HandlerError> {
    let lang = i18n::admin_lang();
    let user = {
        let conn = db::get_connection(&deps.db_pool)?;
        db::get_user(&conn, user_id)?
    };

    let Some(user) = user else {
        deps.sessions.clear(admin_id).await;
        bot.send_message(chat_id, i18n::t(lang, "reply-unknown-user")).await?;
        return Ok(());
    };

    deps.sessions.set(admin_id, PendingInput::ReplyTo(user_id)).await;

    let mut args = FluentArgs::new();
    args.set("full_name", html::escape(&user.display_name()));
    args.set("user_id", user_id.to_string());
    args.set("username", username_or_none(lang, user.username.as_deref()));
    bot.send_message(chat_id, i18n::t_args(lang, "reply-prompt", &args))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Admin-facing text for the outcome of a reply.
pub fn relay_outcome_text(lang: Language, outcome: &Result<Delivery, RelayError>) -> String {
    match outcome {
        Ok(_) => i18n::t(lang, "reply-sent"),
        Err(RelayError::EmptyReply) => i18n::t(lang, "reply-empty"),
        Err(RelayError::UnresolvedOrigin) => i18n::t(lang, "reply-unresolved"),
        Err(RelayError::UnknownUser(_)) => i18n::t(lang, "reply-unknown-user"),
        Err(e @ (RelayError::DeliveryFailure(_) | RelayError::Storage(_))) => {
            let mut args = FluentArgs::new();
            args.set("error", html::escape(&e.to_string()));
            i18n::t_args(lang, "reply-failed", &args)
        }
    }
}

/// Tells the admin how a reply ended.
pub async fn report_relay_outcome(
    bot: &Bot,
    chat_id: ChatId,
    reply_to: MessageId,
    outcome: &Result<Delivery, RelayError>,
) -> ResponseResult<()> {
    bot.send_message(chat_id, relay_outcome_text(i18n::admin_lang(), outcome))
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(reply_to))
        .await?;
    Ok(())
}

/// Relays the admin's message to the user chosen with the reply button.
pub async fn relay_pending_reply(bot: &Bot, deps: &HandlerDeps, msg: &Message, user_id: i64) -> Result<(), HandlerError> {
    let reply = AdminReply::from_message(msg);
    let outcome = relay_admin_reply(deps.db_pool.as_ref(), bot, user_id, &reply).await;
    report_relay_outcome(bot, msg.chat.id, msg.id, &outcome).await?;
    Ok(())
}

/// Relays an admin's reply to a notification (or to the content under it).
pub async fn relay_thread_reply(bot: &Bot, deps: &HandlerDeps, msg: &Message) -> Result<(), HandlerError> {
    let Some(replied_to) = msg.reply_to_message() else {
        return Ok(());
    };

    let reply = AdminReply::from_message(msg);
    let chat_id = msg.chat.id;
    let thread = ThreadMessage::from_message(replied_to, |m| recorded_thread_user(&deps.db_pool, chat_id, m.id));
    let outcome = reply_to_thread(deps.db_pool.as_ref(), bot, &thread, &reply).await;
    if let Err(e) = &outcome {
        log::warn!("Admin {} reply not relayed: {}", chat_id, e);
    }
    report_relay_outcome(bot, chat_id, msg.id, &outcome).await?;
    Ok(())
}

/// Routes admin panel buttons, reply buttons and the clean-db confirmation.
pub async fn handle_admin_callback(
    bot: &Bot,
    deps: &HandlerDeps,
    chat_id: ChatId,
    current: Option<&Message>,
    user_id: i64,
    action: CallbackAction,
) -> Result<(), HandlerError> {
    if !ensure_admin(bot, deps, chat_id, user_id).await? {
        return Ok(());
    }

    match action {
        CallbackAction::Admin(AdminAction::Users) => send_users_list(bot, deps, chat_id).await?,
        CallbackAction::Admin(AdminAction::Stats) => send_stats(bot, deps, chat_id).await?,
        CallbackAction::Admin(AdminAction::Broadcast) => start_broadcast(bot, deps, chat_id, user_id).await?,
        CallbackAction::Admin(AdminAction::Export) => send_export(bot, deps, chat_id).await?,
        CallbackAction::Admin(AdminAction::Backup) => send_backup(bot, chat_id).await?,
        CallbackAction::Admin(AdminAction::CleanDb) => confirm_clean_database(bot, chat_id).await?,
        CallbackAction::Admin(AdminAction::Admins) => send_admin_list(bot, deps, chat_id).await?,
        CallbackAction::Admin(AdminAction::Back) => {
            deps.sessions.clear(user_id).await;
            show_admin_panel(bot, chat_id, current).await?
        }
        CallbackAction::ReplyUser(target) => start_reply(bot, deps, chat_id, user_id, target).await?,
        CallbackAction::CleanDbConfirm(confirmed) => clean_database(bot, deps, chat_id, current, confirmed).await?,
        other => log::warn!("Unexpected admin callback {:?}", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(telegram_id: i64, name: &str) -> User {
        User {
            id: telegram_id,
            telegram_id,
            username: Some(format!("u{}", telegram_id)),
            full_name: Some(name.to_string()),
            phone_number: None,
            language: "uz".to_string(),
            created_at: "2025-06-01 10:00:00".to_string(),
            updated_at: "2025-06-01 10:00:00".to_string(),
        }
    }

    #[test]
    fn users_list_shows_page_and_remainder() {
        let users: Vec<User> = (1..=3).map(|i| user(i, "Ali")).collect();
        let text = users_list_text(Language::En, 25, &users);

        assert!(text.contains("<b>Total:</b> 25 users"));
        assert!(text.contains("🆔 <code>2</code> | @u2"));
        assert!(text.ends_with("... and 22 more users"));
    }

    #[test]
    fn users_list_empty() {
        assert_eq!(users_list_text(Language::En, 0, &[]), "❌ No users in the database.");
    }

    #[test]
    fn users_list_stays_within_message_limit() {
        let long_name = "N".repeat(300);
        let users: Vec<User> = (1..=20).map(|i| user(i, &long_name)).collect();
        let text = users_list_text(Language::En, 20, &users);
        assert!(text.len() <= config::panel::MAX_MESSAGE_LENGTH);
        assert!(text.contains("more users"));
    }

    #[test]
    fn stats_text_lists_all_numbers() {
        let stats = UserStats {
            total: 10,
            today: 1,
            last_7_days: 4,
            last_30_days: 9,
            with_phone: 3,
            with_username: 7,
        };
        let text = stats_text(Language::En, &stats, "2025-06-01 10:00:00 UTC");
        assert!(text.contains("<b>Total users:</b> 10"));
        assert!(text.contains("Last 7 days: 4"));
        assert!(text.contains("With username: 7"));
        assert!(text.contains("2025-06-01 10:00:00 UTC"));
    }

    #[test]
    fn every_relay_outcome_has_an_answer() {
        let empty: Result<Delivery, RelayError> = Err(RelayError::EmptyReply);
        assert_eq!(relay_outcome_text(Language::En, &empty), i18n::t(Language::En, "reply-empty"));
        assert!(relay_outcome_text(Language::En, &empty).contains("Stickers"));

        let failed: Result<Delivery, RelayError> = Err(RelayError::DeliveryFailure("Forbidden: bot was blocked".into()));
        assert!(relay_outcome_text(Language::En, &failed).contains("Forbidden: bot was blocked"));

        let unknown: Result<Delivery, RelayError> = Err(RelayError::UnknownUser(555));
        assert_eq!(relay_outcome_text(Language::Ru, &unknown), i18n::t(Language::Ru, "reply-unknown-user"));
    }

    #[test]
    fn panel_keyboard_layout() {
        let keyboard = admin_panel_keyboard(Language::En);
        assert_eq!(keyboard.inline_keyboard.len(), 4);
        assert_eq!(keyboard.inline_keyboard[1][0].text, "📢 Broadcast");
    }
}
