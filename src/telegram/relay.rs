//! Delivery of admin replies and broadcasts
//!
//! One relay operation covers text and every supported media kind: the
//! attachment is a tagged union and the [`Transport`] picks the matching Bot
//! API method. Delivery and user lookup sit behind traits so the reply flow can
//! be exercised without Telegram or a database.

use std::time::Duration;

use async_trait::async_trait;
use fluent_templates::fluent_bundle::FluentArgs;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardMarkup, InputFile, MessageId, ParseMode, ReplyParameters};
use teloxide::utils::html;
use teloxide::utils::render::RenderMessageTextHelper;
use teloxide::RequestError;
use thiserror::Error;

use crate::core::error::AppError;
use crate::i18n::{self, Language};
use crate::storage::db::{self, DbPool, User};
use crate::telegram::correlator::{resolve_origin, ThreadMessage};

/// Telegram limit for media captions
pub const MAX_CAPTION_LENGTH: usize = 1024;
/// Telegram limit for text messages
pub const MAX_TEXT_LENGTH: usize = 4096;

/// Errors of the admin reply path.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The admin's message has no text and no supported attachment
    #[error("nothing to relay: send text, a photo, video, document, audio, voice or animation")]
    EmptyReply,

    /// No step of the correlation chain produced a user id
    #[error("could not determine the user of this thread")]
    UnresolvedOrigin,

    /// The resolved id is not in the user directory
    #[error("user {0} not found")]
    UnknownUser(i64),

    /// Telegram refused the relayed message (blocked bot, deleted chat, ...)
    #[error("{0}")]
    DeliveryFailure(String),

    #[error("storage error: {0}")]
    Storage(#[from] AppError),
}

/// A single media item carried by a message, referenced by Telegram file id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Photo(String),
    Video(String),
    Document(String),
    Audio(String),
    Voice(String),
    Animation(String),
}

impl Attachment {
    /// Extracts the attachment of a message. Photos use the largest size.
    pub fn from_message(msg: &Message) -> Option<Self> {
        if let Some(sizes) = msg.photo() {
            return sizes.last().map(|p| Attachment::Photo(p.file.id.0.clone()));
        }
        if let Some(video) = msg.video() {
            return Some(Attachment::Video(video.file.id.0.clone()));
        }
        // Animations also carry a document, so they go first
        if let Some(animation) = msg.animation() {
            return Some(Attachment::Animation(animation.file.id.0.clone()));
        }
        if let Some(document) = msg.document() {
            return Some(Attachment::Document(document.file.id.0.clone()));
        }
        if let Some(audio) = msg.audio() {
            return Some(Attachment::Audio(audio.file.id.0.clone()));
        }
        if let Some(voice) = msg.voice() {
            return Some(Attachment::Voice(voice.file.id.0.clone()));
        }
        None
    }

    pub fn file_id(&self) -> &str {
        match self {
            Attachment::Photo(id)
            | Attachment::Video(id)
            | Attachment::Document(id)
            | Attachment::Audio(id)
            | Attachment::Voice(id)
            | Attachment::Animation(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Attachment::Photo(_) => "photo",
            Attachment::Video(_) => "video",
            Attachment::Document(_) => "document",
            Attachment::Audio(_) => "audio",
            Attachment::Voice(_) => "voice",
            Attachment::Animation(_) => "animation",
        }
    }

    fn input_file(&self) -> InputFile {
        InputFile::file_id(FileId(self.file_id().to_string()))
    }
}

/// Everything needed to send one message through a [`Transport`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub attachment: Option<Attachment>,
    /// Message text, or the caption when an attachment is present
    pub text: String,
    pub reply_to: Option<MessageId>,
    pub html: bool,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

impl OutgoingMessage {
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: true,
            ..Self::default()
        }
    }

    pub fn with_attachment(mut self, attachment: Option<Attachment>) -> Self {
        self.attachment = attachment;
        self
    }

    pub fn reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn with_keyboard(mut self, keyboard: InlineKeyboardMarkup) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Text trimmed to the limit of the message kind.
    ///
    /// For HTML the limit applies to the visible text, as Telegram counts it
    /// after parsing.
    pub fn body(&self) -> String {
        let limit = if self.attachment.is_some() {
            MAX_CAPTION_LENGTH
        } else {
            MAX_TEXT_LENGTH
        };
        if self.html {
            truncate_html(&self.text, limit)
        } else {
            truncate_chars(&self.text, limit)
        }
    }

    /// Builds a copy of a user or admin message, keeping its formatting as HTML.
    pub fn copy_of(msg: &Message) -> Option<Self> {
        let attachment = Attachment::from_message(msg);
        let text = match &attachment {
            Some(_) => msg.html_caption().unwrap_or_default(),
            None => msg.html_text()?,
        };
        Some(OutgoingMessage::html(text).with_attachment(attachment))
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut trimmed: String = text.chars().take(limit - 1).collect();
    trimmed.push('…');
    trimmed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HtmlToken<'a> {
    /// `<b>`, `</a>`, `<a href="...">`
    Tag(&'a str),
    /// One visible character: a plain char or an entity such as `&amp;`
    Char(&'a str),
}

fn tokenize_html(html: &str) -> Vec<HtmlToken<'_>> {
    let mut tokens = Vec::new();
    let mut rest = html;

    while let Some(c) = rest.chars().next() {
        let tag_len = match c {
            '<' => rest.find('>').map(|end| end + 1),
            _ => None,
        };
        let token = match tag_len {
            Some(len) => HtmlToken::Tag(&rest[..len]),
            None => {
                let len = match c {
                    '&' => entity_len(rest).unwrap_or(1),
                    _ => c.len_utf8(),
                };
                HtmlToken::Char(&rest[..len])
            }
        };
        let consumed = match token {
            HtmlToken::Tag(s) | HtmlToken::Char(s) => s.len(),
        };
        tokens.push(token);
        rest = &rest[consumed..];
    }

    tokens
}

/// Byte length of an entity like `&lt;` or `&#128512;` at the start of `rest`.
fn entity_len(rest: &str) -> Option<usize> {
    let (end, _) = rest
        .char_indices()
        .skip(1)
        .take(10)
        .find(|&(_, ch)| !(ch.is_ascii_alphanumeric() || ch == '#'))?;
    (end > 1 && rest[end..].starts_with(';')).then_some(end + 1)
}

/// Name of a tag and whether it closes an element. `None` for self-closing tags.
fn tag_name(tag: &str) -> Option<(&str, bool)> {
    let inner = tag.trim_start_matches('<').trim_end_matches('>');
    if inner.ends_with('/') {
        return None;
    }
    let (inner, closing) = match inner.strip_prefix('/') {
        Some(name) => (name, true),
        None => (inner, false),
    };
    let name = inner.split(|c: char| c.is_whitespace()).next().unwrap_or_default();
    Some((name, closing))
}

/// Trims Telegram HTML to `limit` visible characters.
///
/// Cuts only between tags and entities and closes every tag left open.
fn truncate_html(html: &str, limit: usize) -> String {
    let tokens = tokenize_html(html);
    let visible = tokens.iter().filter(|t| matches!(t, HtmlToken::Char(_))).count();
    if visible <= limit {
        return html.to_string();
    }

    let budget = limit.saturating_sub(1);
    let mut out = String::with_capacity(html.len());
    let mut open: Vec<&str> = Vec::new();
    let mut shown = 0;

    for token in tokens {
        match token {
            HtmlToken::Tag(tag) => {
                match tag_name(tag) {
                    Some((name, false)) => open.push(name),
                    Some((name, true)) => {
                        if let Some(pos) = open.iter().rposition(|open_name| *open_name == name) {
                            open.truncate(pos);
                        }
                    }
                    None => {}
                }
                out.push_str(tag);
            }
            HtmlToken::Char(ch) => {
                if shown == budget {
                    break;
                }
                out.push_str(ch);
                shown += 1;
            }
        }
    }

    out.push('…');
    for name in open.iter().rev() {
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }
    out
}

/// Sends messages somewhere. Implemented by [`Bot`]; tests use a recorder.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, chat_id: ChatId, message: &OutgoingMessage) -> Result<MessageId, RequestError>;
}

macro_rules! send_media {
    ($request:expr, $message:expr, $caption:expr) => {{
        let mut request = $request;
        if !$caption.is_empty() {
            request = request.caption($caption);
        }
        if $message.html {
            request = request.parse_mode(ParseMode::Html);
        }
        if let Some(reply_to) = $message.reply_to {
            request = request.reply_parameters(ReplyParameters::new(reply_to));
        }
        if let Some(keyboard) = $message.keyboard.clone() {
            request = request.reply_markup(keyboard);
        }
        request.await?
    }};
}

#[async_trait]
impl Transport for Bot {
    async fn deliver(&self, chat_id: ChatId, message: &OutgoingMessage) -> Result<MessageId, RequestError> {
        let body = message.body();

        let sent = match &message.attachment {
            None => {
                let mut request = self.send_message(chat_id, body);
                if message.html {
                    request = request.parse_mode(ParseMode::Html);
                }
                if let Some(reply_to) = message.reply_to {
                    request = request.reply_parameters(ReplyParameters::new(reply_to));
                }
                if let Some(keyboard) = message.keyboard.clone() {
                    request = request.reply_markup(keyboard);
                }
                request.await?
            }
            Some(attachment @ Attachment::Photo(_)) => {
                send_media!(self.send_photo(chat_id, attachment.input_file()), message, body)
            }
            Some(attachment @ Attachment::Video(_)) => {
                send_media!(self.send_video(chat_id, attachment.input_file()), message, body)
            }
            Some(attachment @ Attachment::Document(_)) => {
                send_media!(self.send_document(chat_id, attachment.input_file()), message, body)
            }
            Some(attachment @ Attachment::Audio(_)) => {
                send_media!(self.send_audio(chat_id, attachment.input_file()), message, body)
            }
            Some(attachment @ Attachment::Voice(_)) => {
                send_media!(self.send_voice(chat_id, attachment.input_file()), message, body)
            }
            Some(attachment @ Attachment::Animation(_)) => {
                send_media!(self.send_animation(chat_id, attachment.input_file()), message, body)
            }
        };

        Ok(sent.id)
    }
}

/// Read access to registered users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, telegram_id: i64) -> Result<Option<User>, AppError>;
}

#[async_trait]
impl UserDirectory for DbPool {
    async fn lookup(&self, telegram_id: i64) -> Result<Option<User>, AppError> {
        let conn = db::get_connection(self)?;
        Ok(db::get_user(&conn, telegram_id)?)
    }
}

/// Content of an admin's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminReply {
    /// Shown to the user in the envelope header
    pub admin_name: String,
    pub attachment: Option<Attachment>,
    /// HTML body: the admin's text, or caption for media
    pub body_html: String,
}

impl AdminReply {
    pub fn text(admin_name: impl Into<String>, body_html: impl Into<String>) -> Self {
        Self {
            admin_name: admin_name.into(),
            attachment: None,
            body_html: body_html.into(),
        }
    }

    pub fn from_message(msg: &Message) -> Self {
        let attachment = Attachment::from_message(msg);
        let body_html = match &attachment {
            Some(_) => msg.html_caption(),
            None => msg.html_text(),
        };
        let admin_name = msg.from.as_ref().map(|u| u.full_name()).unwrap_or_else(|| "Admin".to_string());

        Self {
            admin_name,
            attachment,
            body_html: body_html.unwrap_or_default(),
        }
    }

    /// True when there is nothing to relay.
    pub fn is_empty(&self) -> bool {
        self.attachment.is_none() && self.body_html.trim().is_empty()
    }
}

/// A reply that reached the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub user: User,
    pub message_id: MessageId,
}

/// Wraps the admin's body into the localized "reply from admin" envelope.
pub fn reply_envelope(lang: Language, admin_name: &str, body_html: &str) -> String {
    let mut args = FluentArgs::new();
    args.set("admin", html::escape(admin_name));
    args.set("body", body_html.to_string());
    i18n::t_args(lang, "admin-reply-envelope", &args)
}

/// Relays an admin reply to `user_id`.
///
/// The user must be known to the directory; otherwise nothing is sent and
/// [`RelayError::UnknownUser`] is returned. Empty replies are rejected before
/// the lookup.
pub async fn relay_admin_reply<D, T>(
    directory: &D,
    transport: &T,
    user_id: i64,
    reply: &AdminReply,
) -> Result<Delivery, RelayError>
where
    D: UserDirectory + ?Sized,
    T: Transport + ?Sized,
{
    if reply.is_empty() {
        return Err(RelayError::EmptyReply);
    }
    let user = directory.lookup(user_id).await?.ok_or(RelayError::UnknownUser(user_id))?;

    let lang = Language::from_code_or_default(&user.language);
    let text = reply_envelope(lang, &reply.admin_name, &reply.body_html);
    let message = OutgoingMessage::html(text).with_attachment(reply.attachment.clone());

    match transport.deliver(ChatId(user.telegram_id), &message).await {
        Ok(message_id) => {
            log::info!(
                "📩 Admin reply delivered: admin={}, user={}, kind={}",
                reply.admin_name,
                user.telegram_id,
                reply.attachment.as_ref().map(|a| a.kind()).unwrap_or("text")
            );
            Ok(Delivery { user, message_id })
        }
        Err(e) => {
            log::error!("❌ Failed to deliver admin reply to {}: {}", user.telegram_id, e);
            Err(RelayError::DeliveryFailure(e.to_string()))
        }
    }
}

/// Resolves the thread origin of `replied_to` and relays the reply there.
pub async fn reply_to_thread<D, T>(
    directory: &D,
    transport: &T,
    replied_to: &ThreadMessage,
    reply: &AdminReply,
) -> Result<Delivery, RelayError>
where
    D: UserDirectory + ?Sized,
    T: Transport + ?Sized,
{
    if reply.is_empty() {
        return Err(RelayError::EmptyReply);
    }
    let origin = resolve_origin(replied_to)?;
    log::info!("🔗 Reply thread resolved: user={} via {:?}", origin.user_id, origin.source);
    relay_admin_reply(directory, transport, origin.user_id, reply).await
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}

/// Sends `message` to every recipient, one at a time with `delay` in between.
///
/// Failures are logged and counted; they never stop the loop.
pub async fn broadcast<T>(transport: &T, recipients: &[i64], message: &OutgoingMessage, delay: Duration) -> BroadcastReport
where
    T: Transport + ?Sized,
{
    let mut report = BroadcastReport {
        total: recipients.len(),
        ..BroadcastReport::default()
    };

    for (index, &chat_id) in recipients.iter().enumerate() {
        match transport.deliver(ChatId(chat_id), message).await {
            Ok(_) => report.success += 1,
            Err(e) => {
                log::warn!("Broadcast to {} failed: {}", chat_id, e);
                report.failed += 1;
            }
        }

        if (index + 1) % 100 == 0 {
            log::info!("📢 Broadcast progress: {}/{}", index + 1, report.total);
        }

        if index + 1 < recipients.len() && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    log::info!(
        "📢 Broadcast finished: success={}, failed={}, total={}",
        report.success,
        report.failed,
        report.total
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_is_trimmed_to_caption_limit() {
        let message = OutgoingMessage::html("a".repeat(2000)).with_attachment(Some(Attachment::Photo("p".into())));
        assert_eq!(message.body().chars().count(), MAX_CAPTION_LENGTH);

        let text = OutgoingMessage::html("a".repeat(2000));
        assert_eq!(text.body().chars().count(), 2000);
    }

    #[test]
    fn text_is_trimmed_to_text_limit() {
        let message = OutgoingMessage::html("я".repeat(5000));
        let body = message.body();
        assert_eq!(body.chars().count(), MAX_TEXT_LENGTH);
        assert!(body.ends_with('…'));
    }

    fn visible_len(html: &str) -> usize {
        tokenize_html(html)
            .iter()
            .filter(|token| matches!(token, HtmlToken::Char(_)))
            .count()
    }

    /// Every closing tag matches the innermost open one and nothing stays open.
    fn assert_balanced(html: &str) {
        let mut open = Vec::new();
        for token in tokenize_html(html) {
            if let HtmlToken::Tag(tag) = token {
                match tag_name(tag) {
                    Some((name, false)) => open.push(name),
                    Some((name, true)) => assert_eq!(open.pop(), Some(name), "unexpected </{}> in {}", name, html),
                    None => {}
                }
            }
        }
        assert!(open.is_empty(), "unclosed tags {:?}", open);
    }

    #[test]
    fn bold_caption_keeps_closing_tag() {
        let text = reply_envelope(Language::Uz, "Admin", &format!("<b>{}</b>", "a".repeat(1000)));
        let message = OutgoingMessage::html(text).with_attachment(Some(Attachment::Photo("p".into())));
        let body = message.body();

        assert_eq!(visible_len(&body), MAX_CAPTION_LENGTH);
        assert!(body.ends_with("…</b>"));
        assert_eq!(body.matches("<b>").count(), body.matches("</b>").count());
        assert_balanced(&body);
    }

    #[test]
    fn entities_are_never_split() {
        let message = OutgoingMessage::html("&amp;".repeat(5000));
        let body = message.body();

        assert_eq!(visible_len(&body), MAX_TEXT_LENGTH);
        assert_eq!(body.matches("&amp;").count(), MAX_TEXT_LENGTH - 1);
        assert!(body.ends_with("&amp;…"));

        // Source longer than the limit, visible text within it.
        let fits = format!("{}&amp;", "x".repeat(4093));
        assert_eq!(OutgoingMessage::html(fits.clone()).body(), fits);
    }

    #[test]
    fn markup_does_not_count_towards_limit() {
        let link = r#"<a href="https://ukiu.uz/uz/qabul/2025/">qabul</a> "#;
        let caption = format!("{}{}", "x".repeat(540), link.repeat(12));
        assert!(caption.chars().count() > MAX_CAPTION_LENGTH);
        assert!(visible_len(&caption) < MAX_CAPTION_LENGTH);

        let message = OutgoingMessage::html(caption.clone()).with_attachment(Some(Attachment::Document("d".into())));
        assert_eq!(message.body(), caption);
    }

    #[test]
    fn cut_inside_link_and_nested_tags() {
        let html = format!(
            r#"<b><i>{}</i></b> <a href="https://ukiu.uz">{}</a>"#,
            "a".repeat(10),
            "b".repeat(5000)
        );
        let body = OutgoingMessage::html(html).body();

        assert!(body.ends_with("b…</a>"));
        assert!(body.starts_with("<b><i>aaaaaaaaaa</i></b> <a href=\"https://ukiu.uz\">"));
        assert_eq!(visible_len(&body), MAX_TEXT_LENGTH);
        assert_balanced(&body);

        let nested = format!("<b><i>{}</i></b>", "c".repeat(5000));
        let body = OutgoingMessage::html(nested).body();
        assert!(body.ends_with("…</i></b>"));
        assert_balanced(&body);
    }

    #[test]
    fn plain_text_is_trimmed_by_chars() {
        let message = OutgoingMessage {
            text: "<".repeat(5000),
            ..OutgoingMessage::default()
        };
        assert_eq!(message.body().chars().count(), MAX_TEXT_LENGTH);
    }

    #[test]
    fn attachment_kinds() {
        assert_eq!(Attachment::Voice("v1".into()).kind(), "voice");
        assert_eq!(Attachment::Animation("a1".into()).file_id(), "a1");
    }

    #[test]
    fn envelope_escapes_admin_name() {
        let text = reply_envelope(Language::En, "<Admin & Co>", "<b>Hi</b>");
        assert!(text.contains("&lt;Admin &amp; Co&gt;"));
        assert!(text.contains("<b>Hi</b>"));
        assert!(text.contains("Reply from admin"));
    }

    #[test]
    fn empty_reply() {
        assert!(AdminReply::text("A", "   ").is_empty());
        assert!(!AdminReply::text("A", "ok").is_empty());
        let media = AdminReply {
            attachment: Some(Attachment::Photo("p".into())),
            ..AdminReply::default()
        };
        assert!(!media.is_empty());
    }
}
