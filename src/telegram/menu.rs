//! Main menu, admission pages, information pages and language selection
//!
//! Also owns the callback data format shared by every inline keyboard of the
//! bot and routes callback queries to the right screen.

use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MaybeInaccessibleMessage, MessageId, ParseMode, WebAppInfo,
};
use teloxide::RequestError;
use url::Url;

use crate::core::config::links;
use crate::i18n::{self, Language};
use crate::storage::db;
use crate::telegram::handlers::types::{HandlerDeps, HandlerError};
use crate::telegram::{admin, cb, feedback, Bot};

/// Static information pages reachable from the main menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoPage {
    University,
    Address,
    Faculties,
    Directions,
}

impl InfoPage {
    fn text_key(self) -> &'static str {
        match self {
            InfoPage::University => "university-info",
            InfoPage::Address => "address-info",
            InfoPage::Faculties => "faculties-info",
            InfoPage::Directions => "directions-info",
        }
    }
}

/// Image pages of the admission submenu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPage {
    Quotas,
    Deadlines,
    Contract,
    Korean,
}

impl AdmissionPage {
    fn label_key(self) -> &'static str {
        match self {
            AdmissionPage::Quotas => "btn-admission-quotas",
            AdmissionPage::Deadlines => "btn-admission-deadlines",
            AdmissionPage::Contract => "btn-contract-payments",
            AdmissionPage::Korean => "btn-korean-benefit",
        }
    }

    fn image_url(self) -> &'static str {
        match self {
            AdmissionPage::Quotas => links::ADMISSION_QUOTAS_IMAGE,
            AdmissionPage::Deadlines => links::ADMISSION_DEADLINES_IMAGE,
            AdmissionPage::Contract => links::CONTRACT_PAYMENTS_IMAGE,
            AdmissionPage::Korean => links::KOREAN_BENEFIT_IMAGE,
        }
    }
}

/// Buttons of the admin panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Users,
    Stats,
    Broadcast,
    Export,
    Backup,
    CleanDb,
    Admins,
    Back,
}

/// Parsed callback data of an inline button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Info(InfoPage),
    AdmissionMenu,
    Admission(AdmissionPage),
    LanguageMenu,
    Feedback,
    BackToMenu,
    BackToAdmission,
    SetLanguage(Language),
    Admin(AdminAction),
    ReplyUser(i64),
    CleanDbConfirm(bool),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let (prefix, value) = data.split_once(':')?;
        let action = match (prefix, value) {
            ("menu", "admission") => CallbackAction::AdmissionMenu,
            ("menu", "university") => CallbackAction::Info(InfoPage::University),
            ("menu", "address") => CallbackAction::Info(InfoPage::Address),
            ("menu", "faculties") => CallbackAction::Info(InfoPage::Faculties),
            ("menu", "directions") => CallbackAction::Info(InfoPage::Directions),
            ("menu", "language") => CallbackAction::LanguageMenu,
            ("menu", "feedback") => CallbackAction::Feedback,
            ("admission", "quotas") => CallbackAction::Admission(AdmissionPage::Quotas),
            ("admission", "deadlines") => CallbackAction::Admission(AdmissionPage::Deadlines),
            ("admission", "contract") => CallbackAction::Admission(AdmissionPage::Contract),
            ("admission", "korean") => CallbackAction::Admission(AdmissionPage::Korean),
            ("back", "menu") => CallbackAction::BackToMenu,
            ("back", "admission") => CallbackAction::BackToAdmission,
            ("lang", code) => CallbackAction::SetLanguage(Language::from_code(code)?),
            ("admin", "users") => CallbackAction::Admin(AdminAction::Users),
            ("admin", "stats") => CallbackAction::Admin(AdminAction::Stats),
            ("admin", "broadcast") => CallbackAction::Admin(AdminAction::Broadcast),
            ("admin", "export") => CallbackAction::Admin(AdminAction::Export),
            ("admin", "backup") => CallbackAction::Admin(AdminAction::Backup),
            ("admin", "cleandb") => CallbackAction::Admin(AdminAction::CleanDb),
            ("admin", "admins") => CallbackAction::Admin(AdminAction::Admins),
            ("admin", "back") => CallbackAction::Admin(AdminAction::Back),
            ("reply_user", id) => CallbackAction::ReplyUser(id.parse().ok()?),
            ("cleandb", "yes") => CallbackAction::CleanDbConfirm(true),
            ("cleandb", "no") => CallbackAction::CleanDbConfirm(false),
            _ => return None,
        };
        Some(action)
    }

    pub fn as_data(&self) -> String {
        match self {
            CallbackAction::AdmissionMenu => "menu:admission".to_string(),
            CallbackAction::Info(InfoPage::University) => "menu:university".to_string(),
            CallbackAction::Info(InfoPage::Address) => "menu:address".to_string(),
            CallbackAction::Info(InfoPage::Faculties) => "menu:faculties".to_string(),
            CallbackAction::Info(InfoPage::Directions) => "menu:directions".to_string(),
            CallbackAction::LanguageMenu => "menu:language".to_string(),
            CallbackAction::Feedback => "menu:feedback".to_string(),
            CallbackAction::Admission(AdmissionPage::Quotas) => "admission:quotas".to_string(),
            CallbackAction::Admission(AdmissionPage::Deadlines) => "admission:deadlines".to_string(),
            CallbackAction::Admission(AdmissionPage::Contract) => "admission:contract".to_string(),
            CallbackAction::Admission(AdmissionPage::Korean) => "admission:korean".to_string(),
            CallbackAction::BackToMenu => "back:menu".to_string(),
            CallbackAction::BackToAdmission => "back:admission".to_string(),
            CallbackAction::SetLanguage(lang) => format!("lang:{}", lang.code()),
            CallbackAction::Admin(action) => {
                let name = match action {
                    AdminAction::Users => "users",
                    AdminAction::Stats => "stats",
                    AdminAction::Broadcast => "broadcast",
                    AdminAction::Export => "export",
                    AdminAction::Backup => "backup",
                    AdminAction::CleanDb => "cleandb",
                    AdminAction::Admins => "admins",
                    AdminAction::Back => "back",
                };
                format!("admin:{}", name)
            }
            CallbackAction::ReplyUser(id) => format!("reply_user:{}", id),
            CallbackAction::CleanDbConfirm(true) => "cleandb:yes".to_string(),
            CallbackAction::CleanDbConfirm(false) => "cleandb:no".to_string(),
        }
    }
}

/// Inline button carrying a [`CallbackAction`].
pub fn action_button(text: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
    cb(text, action.as_data())
}

fn url_button(text: String, url: &str) -> Option<InlineKeyboardButton> {
    match Url::parse(url) {
        Ok(url) => Some(InlineKeyboardButton::url(text, url)),
        Err(e) => {
            log::warn!("Skipping button with invalid URL {}: {}", url, e);
            None
        }
    }
}

fn web_app_button(text: String, url: &str) -> Option<InlineKeyboardButton> {
    match Url::parse(url) {
        Ok(url) => Some(InlineKeyboardButton::web_app(text, WebAppInfo { url })),
        Err(e) => {
            log::warn!("Skipping web app button with invalid URL {}: {}", url, e);
            None
        }
    }
}

pub fn main_menu_keyboard(lang: Language) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();

    if let Some(tour) = web_app_button(i18n::t(lang, "btn-360"), &links::tour_360(lang.code())) {
        rows.push(vec![tour]);
    }
    rows.push(vec![action_button(i18n::t(lang, "btn-admission"), CallbackAction::AdmissionMenu)]);
    rows.push(vec![action_button(
        i18n::t(lang, "btn-university-info"),
        CallbackAction::Info(InfoPage::University),
    )]);
    rows.push(vec![action_button(
        i18n::t(lang, "btn-address"),
        CallbackAction::Info(InfoPage::Address),
    )]);
    rows.push(vec![
        action_button(i18n::t(lang, "btn-faculties"), CallbackAction::Info(InfoPage::Faculties)),
        action_button(i18n::t(lang, "btn-directions"), CallbackAction::Info(InfoPage::Directions)),
    ]);
    rows.push(vec![action_button(i18n::t(lang, "btn-language"), CallbackAction::LanguageMenu)]);

    let mut last_row = Vec::new();
    if let Some(developer) = url_button(i18n::t(lang, "btn-developer"), links::DEVELOPER_URL) {
        last_row.push(developer);
    }
    last_row.push(action_button(i18n::t(lang, "btn-feedback"), CallbackAction::Feedback));
    rows.push(last_row);

    InlineKeyboardMarkup::new(rows)
}

pub fn admission_keyboard(lang: Language) -> InlineKeyboardMarkup {
    let pages = [
        AdmissionPage::Quotas,
        AdmissionPage::Deadlines,
        AdmissionPage::Contract,
        AdmissionPage::Korean,
    ];
    let mut rows: Vec<Vec<InlineKeyboardButton>> = pages
        .iter()
        .map(|&page| vec![action_button(i18n::t(lang, page.label_key()), CallbackAction::Admission(page))])
        .collect();
    rows.push(vec![action_button(i18n::t(lang, "btn-back"), CallbackAction::BackToMenu)]);
    InlineKeyboardMarkup::new(rows)
}

fn admission_page_keyboard(lang: Language) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![action_button(i18n::t(lang, "btn-back-admission"), CallbackAction::BackToAdmission)],
        vec![action_button(i18n::t(lang, "btn-back"), CallbackAction::BackToMenu)],
    ])
}

pub fn language_keyboard(lang: Language) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![action_button(
            i18n::t(lang, "lang-uzbek"),
            CallbackAction::SetLanguage(Language::Uz),
        )],
        vec![action_button(
            i18n::t(lang, "lang-english"),
            CallbackAction::SetLanguage(Language::En),
        )],
        vec![action_button(
            i18n::t(lang, "lang-russian"),
            CallbackAction::SetLanguage(Language::Ru),
        )],
        vec![action_button(i18n::t(lang, "btn-back"), CallbackAction::BackToMenu)],
    ])
}

pub fn back_keyboard(lang: Language) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![action_button(
        i18n::t(lang, "btn-back"),
        CallbackAction::BackToMenu,
    )]])
}

/// Sends the main menu as a new message.
pub async fn send_main_menu(bot: &Bot, chat_id: ChatId, lang: Language) -> ResponseResult<Message> {
    bot.send_message(chat_id, i18n::t(lang, "main-menu"))
        .parse_mode(ParseMode::Html)
        .reply_markup(main_menu_keyboard(lang))
        .await
}

/// Greeting used by /start and after a language change.
pub async fn send_welcome(bot: &Bot, chat_id: ChatId, lang: Language) -> ResponseResult<Message> {
    let text = format!("{}\n\n{}", i18n::t(lang, "welcome"), i18n::t(lang, "main-menu"));
    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_menu_keyboard(lang))
        .await
}

pub async fn send_admission_menu(bot: &Bot, chat_id: ChatId, lang: Language) -> ResponseResult<Message> {
    bot.send_message(chat_id, i18n::t(lang, "admission-menu-title"))
        .parse_mode(ParseMode::Html)
        .reply_markup(admission_keyboard(lang))
        .await
}

/// Replaces the content of a menu message.
///
/// Text messages are edited in place. Photos cannot become text, so they are
/// deleted and a new message is sent instead.
pub async fn replace_screen(
    bot: &Bot,
    chat_id: ChatId,
    current: Option<&Message>,
    text: String,
    keyboard: InlineKeyboardMarkup,
) -> ResponseResult<()> {
    if let Some(message) = current {
        if message.text().is_some() {
            let edited = bot
                .edit_message_text(chat_id, message.id, text.clone())
                .parse_mode(ParseMode::Html)
                .reply_markup(keyboard.clone())
                .await;
            match edited {
                Ok(_) => return Ok(()),
                Err(e) => log::debug!("Edit of message {} failed, sending a new one: {}", message.id.0, e),
            }
        } else {
            let _ = bot.delete_message(chat_id, message.id).await;
        }
    }

    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .await?;
    Ok(())
}

async fn send_admission_page(bot: &Bot, chat_id: ChatId, lang: Language, page: AdmissionPage) -> ResponseResult<()> {
    let caption = i18n::t(lang, page.label_key());
    let url = Url::parse(page.image_url())
        .map_err(|e| RequestError::from(std::sync::Arc::new(std::io::Error::other(e.to_string()))))?;

    bot.send_photo(chat_id, InputFile::url(url))
        .caption(caption)
        .reply_markup(admission_page_keyboard(lang))
        .await?;
    Ok(())
}

async fn delete_quietly(bot: &Bot, chat_id: ChatId, message_id: Option<MessageId>) {
    if let Some(message_id) = message_id {
        if let Err(e) = bot.delete_message(chat_id, message_id).await {
            log::debug!("Could not delete message {}: {}", message_id.0, e);
        }
    }
}

async fn change_language(
    bot: &Bot,
    deps: &HandlerDeps,
    q: &CallbackQuery,
    chat_id: ChatId,
    current: Option<&Message>,
    lang: Language,
) -> Result<(), HandlerError> {
    let user_id = i64::try_from(q.from.id.0)?;
    let full_name = q.from.full_name();
    {
        let conn = db::get_connection(&deps.db_pool)?;
        db::get_or_create_user(&conn, user_id, q.from.username.as_deref(), Some(&full_name))?;
        db::set_user_language(&conn, user_id, lang.code())?;
    }
    log::info!("🌍 User {} switched language to {}", user_id, lang.code());

    replace_screen(
        bot,
        chat_id,
        current,
        i18n::t(lang, "language-changed"),
        InlineKeyboardMarkup::default(),
    )
    .await?;
    send_welcome(bot, chat_id, lang).await?;
    Ok(())
}

/// Routes a callback query from any inline keyboard.
pub async fn handle_callback(bot: Bot, q: CallbackQuery, deps: HandlerDeps) -> Result<(), HandlerError> {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        log::debug!("answer_callback_query failed: {}", e);
    }

    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let Some(action) = CallbackAction::parse(data) else {
        log::warn!("Unknown callback data: {}", data);
        return Ok(());
    };

    let Some(chat_id) = q.message.as_ref().map(|m| m.chat().id) else {
        return Ok(());
    };
    if !chat_id.is_user() {
        return Ok(());
    }
    let message_id = q.message.as_ref().map(|m| m.id());
    let current = match q.message.as_ref() {
        Some(MaybeInaccessibleMessage::Regular(msg)) => Some::<&Message>(msg),
        _ => None,
    };

    let user_id = i64::try_from(q.from.id.0)?;
    let lang = i18n::user_lang_from_pool(&deps.db_pool, user_id);
    log::debug!("Callback {:?} from user {}", action, user_id);

    match action {
        CallbackAction::Info(page) => {
            replace_screen(&bot, chat_id, current, i18n::t(lang, page.text_key()), back_keyboard(lang)).await?;
        }
        CallbackAction::AdmissionMenu => {
            replace_screen(
                &bot,
                chat_id,
                current,
                i18n::t(lang, "admission-menu-title"),
                admission_keyboard(lang),
            )
            .await?;
        }
        CallbackAction::Admission(page) => {
            delete_quietly(&bot, chat_id, message_id).await;
            send_admission_page(&bot, chat_id, lang, page).await?;
        }
        CallbackAction::LanguageMenu => {
            replace_screen(
                &bot,
                chat_id,
                current,
                i18n::t(lang, "select-language"),
                language_keyboard(lang),
            )
            .await?;
        }
        CallbackAction::Feedback => {
            feedback::start_feedback(&bot, &deps, chat_id, current, user_id, lang).await?;
        }
        CallbackAction::BackToMenu => {
            deps.sessions.clear(user_id).await;
            delete_quietly(&bot, chat_id, message_id).await;
            send_main_menu(&bot, chat_id, lang).await?;
        }
        CallbackAction::BackToAdmission => {
            delete_quietly(&bot, chat_id, message_id).await;
            send_admission_menu(&bot, chat_id, lang).await?;
        }
        CallbackAction::SetLanguage(new_lang) => {
            change_language(&bot, &deps, &q, chat_id, current, new_lang).await?;
        }
        CallbackAction::Admin(_) | CallbackAction::ReplyUser(_) | CallbackAction::CleanDbConfirm(_) => {
            admin::handle_admin_callback(&bot, &deps, chat_id, current, user_id, action).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn callback_data_round_trip() {
        let actions = [
            CallbackAction::AdmissionMenu,
            CallbackAction::Info(InfoPage::University),
            CallbackAction::Info(InfoPage::Directions),
            CallbackAction::Admission(AdmissionPage::Korean),
            CallbackAction::LanguageMenu,
            CallbackAction::Feedback,
            CallbackAction::BackToMenu,
            CallbackAction::BackToAdmission,
            CallbackAction::SetLanguage(Language::Ru),
            CallbackAction::Admin(AdminAction::Export),
            CallbackAction::Admin(AdminAction::Back),
            CallbackAction::ReplyUser(987654321),
            CallbackAction::CleanDbConfirm(true),
            CallbackAction::CleanDbConfirm(false),
        ];
        for action in actions {
            assert_eq!(CallbackAction::parse(&action.as_data()), Some(action));
        }
    }

    #[test]
    fn known_callback_strings() {
        assert_eq!(
            CallbackAction::parse("reply_user:42"),
            Some(CallbackAction::ReplyUser(42))
        );
        assert_eq!(
            CallbackAction::parse("lang:en"),
            Some(CallbackAction::SetLanguage(Language::En))
        );
        assert_eq!(CallbackAction::SetLanguage(Language::Uz).as_data(), "lang:uz");
        assert_eq!(CallbackAction::Admin(AdminAction::CleanDb).as_data(), "admin:cleandb");
    }

    #[test]
    fn rejects_malformed_data() {
        assert_eq!(CallbackAction::parse("reply_user:abc"), None);
        assert_eq!(CallbackAction::parse("lang:de"), None);
        assert_eq!(CallbackAction::parse("menu"), None);
        assert_eq!(CallbackAction::parse("unknown:thing"), None);
    }

    #[test]
    fn main_menu_has_feedback_and_language_buttons() {
        let keyboard = main_menu_keyboard(Language::En);
        let texts: Vec<&str> = keyboard
            .inline_keyboard
            .iter()
            .flatten()
            .map(|button| button.text.as_str())
            .collect();
        assert!(texts.contains(&"🌍 Language"));
        assert!(texts.contains(&"💬 Feedback and suggestions"));
        assert_eq!(keyboard.inline_keyboard.len(), 7);
    }

    #[test]
    fn admission_keyboard_ends_with_back() {
        let keyboard = admission_keyboard(Language::Uz);
        assert_eq!(keyboard.inline_keyboard.len(), 5);
        assert_eq!(keyboard.inline_keyboard[4][0].text, "⬅️ Orqaga");
    }
}
