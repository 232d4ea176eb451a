//! Reply correlation for admin answers
//!
//! When an admin replies to a feedback notification (or to the user's content
//! attached under it), the bot has to recover which user the thread belongs to.
//! The lookup is an ordered fallback chain, first success wins:
//!
//! 0. thread key recorded when the bot sent the message
//! 1. "forwarded from" metadata of the replied-to message
//! 2. `🆔 User ID: <code>N</code>` in the replied-to text (first match)
//! 3. `🆔 ID: <code>N</code>` in the replied-to text (last match)
//! 4. bare `ID: <code>N</code>` (last match), only inside a notification-looking text
//! 5. steps 2-4 on the replied-to caption
//! 6. steps 2-4 on the text of the message the replied-to message answers
//!
//! Everything here is synchronous and free of I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use teloxide::types::{Message, MessageOrigin};
use teloxide::utils::render::RenderMessageTextHelper;

use crate::telegram::relay::RelayError;

/// Divider line used in every admin notification.
pub const NOTIFICATION_DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━━";

/// Localized "user" labels that mark a text as an admin notification.
const USER_LABELS: [&str; 3] = ["Foydalanuvchi", "Пользователь", "User"];

static USER_ID_MARKER: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(r"(?i)🆔\s*(?:<b>)?\s*User\s+ID:\s*(?:</b>)?\s*<code>\s*(\d+)\s*</code>")
});

static ID_MARKER: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"🆔\s*(?:<b>)?\s*ID:\s*(?:</b>)?\s*<code>\s*(\d+)\s*</code>"));

static BARE_ID_MARKER: Lazy<Option<Regex>> = Lazy::new(|| compile(r"ID:\s*(?:</b>)?\s*<code>\s*(\d+)\s*</code>"));

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::error!("Invalid correlation pattern {}: {}", pattern, e);
            None
        }
    }
}

/// The part of a reply thread the correlator looks at.
///
/// Built from the message the admin replied to. Texts are HTML renderings so
/// that `<code>` markers survive the round trip through message entities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadMessage {
    /// User id stored for this message when the bot sent it
    pub recorded_origin: Option<i64>,
    /// Sender of the original message if this one is a forward from a user
    pub forwarded_from: Option<i64>,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// The message this one replies to
    pub parent: Option<Box<ThreadMessage>>,
}

impl ThreadMessage {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_caption(caption: impl Into<String>) -> Self {
        Self {
            caption: Some(caption.into()),
            ..Self::default()
        }
    }

    pub fn replying_to(mut self, parent: ThreadMessage) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Builds the correlation view of a Telegram message.
    ///
    /// `recorded` resolves stored thread keys by message id; it is consulted
    /// for the message itself and for its parent.
    pub fn from_message<F>(msg: &Message, recorded: F) -> Self
    where
        F: Fn(&Message) -> Option<i64>,
    {
        let parent = msg.reply_to_message().map(|parent| {
            Box::new(ThreadMessage {
                recorded_origin: recorded(parent),
                forwarded_from: forwarded_user_id(parent),
                text: parent.html_text(),
                caption: parent.html_caption(),
                parent: None,
            })
        });

        ThreadMessage {
            recorded_origin: recorded(msg),
            forwarded_from: forwarded_user_id(msg),
            text: msg.html_text(),
            caption: msg.html_caption(),
            parent,
        }
    }
}

fn forwarded_user_id(msg: &Message) -> Option<i64> {
    match msg.forward_origin()? {
        MessageOrigin::User { sender_user, .. } => i64::try_from(sender_user.id.0).ok(),
        _ => None,
    }
}

/// Where the origin user id was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginSource {
    ThreadKey,
    Forward,
    Text,
    Caption,
    ParentText,
    ParentThreadKey,
}

/// A resolved thread origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub user_id: i64,
    pub source: OriginSource,
}

/// Recovers the origin user of the thread `replied_to` belongs to.
///
/// Returns [`RelayError::UnresolvedOrigin`] when no step of the chain yields an id.
pub fn resolve_origin(replied_to: &ThreadMessage) -> Result<Origin, RelayError> {
    let found = |user_id, source| Ok(Origin { user_id, source });

    if let Some(user_id) = replied_to.recorded_origin {
        return found(user_id, OriginSource::ThreadKey);
    }
    if let Some(user_id) = replied_to.forwarded_from {
        return found(user_id, OriginSource::Forward);
    }
    if let Some(user_id) = replied_to.text.as_deref().and_then(scan_markers) {
        return found(user_id, OriginSource::Text);
    }
    if let Some(user_id) = replied_to.caption.as_deref().and_then(scan_markers) {
        return found(user_id, OriginSource::Caption);
    }
    if let Some(parent) = replied_to.parent.as_deref() {
        if let Some(user_id) = parent.text.as_deref().and_then(scan_markers) {
            return found(user_id, OriginSource::ParentText);
        }
        if let Some(user_id) = parent.recorded_origin {
            return found(user_id, OriginSource::ParentThreadKey);
        }
    }

    Err(RelayError::UnresolvedOrigin)
}

/// Runs the three text patterns against one text, in order.
pub fn scan_markers(text: &str) -> Option<i64> {
    if let Some(id) = first_match(&USER_ID_MARKER, text) {
        return Some(id);
    }
    if let Some(id) = last_match(&ID_MARKER, text) {
        return Some(id);
    }
    if looks_like_notification(text) {
        return last_match(&BARE_ID_MARKER, text);
    }
    None
}

fn looks_like_notification(text: &str) -> bool {
    text.contains(NOTIFICATION_DIVIDER) || USER_LABELS.iter().any(|label| text.contains(label))
}

fn first_match(re: &Option<Regex>, text: &str) -> Option<i64> {
    let re = re.as_ref()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn last_match(re: &Option<Regex>, text: &str) -> Option<i64> {
    let re = re.as_ref()?;
    re.captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(msg: &ThreadMessage) -> Option<(i64, OriginSource)> {
        resolve_origin(msg).ok().map(|o| (o.user_id, o.source))
    }

    #[test]
    fn user_id_marker_plain_and_bold() {
        assert_eq!(scan_markers("🆔 User ID: <code>123</code>"), Some(123));
        assert_eq!(scan_markers("🆔 <b>User ID:</b> <code>77</code>"), Some(77));
        assert_eq!(scan_markers("🆔 <b>user id:</b> <code>78</code>"), Some(78));
    }

    #[test]
    fn user_id_marker_takes_first_match() {
        let text = "🆔 User ID: <code>1</code>\n🆔 User ID: <code>2</code>";
        assert_eq!(scan_markers(text), Some(1));
    }

    #[test]
    fn user_id_marker_beats_id_marker() {
        let text = "🆔 ID: <code>5</code>\n🆔 User ID: <code>6</code>";
        assert_eq!(scan_markers(text), Some(6));
    }

    #[test]
    fn id_marker_single() {
        assert_eq!(scan_markers("hello\n🆔 <b>ID:</b> <code>42</code>"), Some(42));
    }

    #[test]
    fn id_marker_takes_last_match() {
        let text = "🆔 ID: <code>10</code>\nsomething\n🆔 ID: <code>20</code>";
        assert_eq!(scan_markers(text), Some(20));
    }

    #[test]
    fn bare_id_needs_notification_context() {
        assert_eq!(scan_markers("ID: <code>99</code>"), None);
        assert_eq!(scan_markers("👤 User: Ali\nID: <code>99</code>"), Some(99));
        assert_eq!(
            scan_markers(&format!("{}\n🆔 <b>Telegram ID:</b> <code>31</code>", NOTIFICATION_DIVIDER)),
            Some(31)
        );
        assert_eq!(scan_markers("Foydalanuvchi\nID: <code>1</code> ID: <code>2</code>"), Some(2));
    }

    #[test]
    fn oversized_number_is_not_a_match() {
        assert_eq!(scan_markers("🆔 User ID: <code>99999999999999999999999</code>"), None);
    }

    #[test]
    fn plain_text_has_no_marker() {
        assert_eq!(scan_markers("Salom, qachon qabul boshlanadi?"), None);
        assert_eq!(scan_markers(""), None);
    }

    #[test]
    fn thread_key_wins_over_everything() {
        let msg = ThreadMessage {
            recorded_origin: Some(1),
            forwarded_from: Some(2),
            text: Some("🆔 User ID: <code>3</code>".to_string()),
            ..ThreadMessage::default()
        };
        assert_eq!(resolved(&msg), Some((1, OriginSource::ThreadKey)));
    }

    #[test]
    fn forward_wins_over_text() {
        let msg = ThreadMessage {
            forwarded_from: Some(2),
            text: Some("🆔 User ID: <code>3</code>".to_string()),
            ..ThreadMessage::default()
        };
        assert_eq!(resolved(&msg), Some((2, OriginSource::Forward)));
    }

    #[test]
    fn caption_fallback() {
        let msg = ThreadMessage::with_caption("📷\n🆔 <b>User ID:</b> <code>314</code>");
        assert_eq!(resolved(&msg), Some((314, OriginSource::Caption)));
    }

    #[test]
    fn text_is_tried_before_caption() {
        let msg = ThreadMessage {
            text: Some("🆔 ID: <code>1</code>".to_string()),
            caption: Some("🆔 ID: <code>2</code>".to_string()),
            ..ThreadMessage::default()
        };
        assert_eq!(resolved(&msg), Some((1, OriginSource::Text)));
    }

    #[test]
    fn parent_text_fallback() {
        let msg = ThreadMessage::with_text("just the user's question")
            .replying_to(ThreadMessage::with_text("💬 NEW FEEDBACK\n🆔 <b>User ID:</b> <code>808</code>"));
        assert_eq!(resolved(&msg), Some((808, OriginSource::ParentText)));
    }

    #[test]
    fn parent_thread_key_fallback() {
        let parent = ThreadMessage {
            recorded_origin: Some(11),
            ..ThreadMessage::default()
        };
        let msg = ThreadMessage::with_text("no marker").replying_to(parent);
        assert_eq!(resolved(&msg), Some((11, OriginSource::ParentThreadKey)));
    }

    #[test]
    fn unresolved_without_marker_or_forward() {
        let msg = ThreadMessage::with_text("nothing here").replying_to(ThreadMessage::with_text("nor here"));
        assert!(matches!(resolve_origin(&msg), Err(RelayError::UnresolvedOrigin)));
        assert!(matches!(
            resolve_origin(&ThreadMessage::default()),
            Err(RelayError::UnresolvedOrigin)
        ));
    }

    fn message(json: &str) -> Message {
        serde_json::from_str(json).unwrap()
    }

    const ADMIN_CHAT: &str = r#"{"id": 10, "type": "private", "first_name": "Admin"}"#;

    #[test]
    fn entities_render_into_markers() {
        let json = format!(
            r#"{{
                "message_id": 77,
                "date": 1717236000,
                "chat": {ADMIN_CHAT},
                "text": "🆔 User ID: 555",
                "entities": [
                    {{"type": "bold", "offset": 3, "length": 8}},
                    {{"type": "code", "offset": 12, "length": 3}}
                ]
            }}"#
        );
        let thread = ThreadMessage::from_message(&message(&json), |_| None);

        assert_eq!(thread.text.as_deref(), Some("🆔 <b>User ID:</b> <code>555</code>"));
        assert_eq!(resolved(&thread), Some((555, OriginSource::Text)));
    }

    #[test]
    fn forward_origin_names_the_user() {
        let json = format!(
            r#"{{
                "message_id": 80,
                "date": 1717236100,
                "chat": {ADMIN_CHAT},
                "forward_origin": {{
                    "type": "user",
                    "date": 1717236050,
                    "sender_user": {{"id": 4242, "is_bot": false, "first_name": "Ali"}}
                }},
                "text": "Yotoqxona bormi?"
            }}"#
        );
        let thread = ThreadMessage::from_message(&message(&json), |_| None);

        assert_eq!(thread.forwarded_from, Some(4242));
        assert_eq!(resolved(&thread), Some((4242, OriginSource::Forward)));
    }

    #[test]
    fn copy_under_header_uses_parent_and_recorded_keys() {
        let json = format!(
            r#"{{
                "message_id": 78,
                "date": 1717236001,
                "chat": {ADMIN_CHAT},
                "text": "Yotoqxona bormi?",
                "reply_to_message": {{
                    "message_id": 77,
                    "date": 1717236000,
                    "chat": {ADMIN_CHAT},
                    "text": "ID: 555",
                    "entities": [{{"type": "code", "offset": 4, "length": 3}}]
                }}
            }}"#
        );
        let copy = message(&json);

        // A bare marker only counts inside a notification-looking text.
        let thread = ThreadMessage::from_message(&copy, |_| None);
        assert_eq!(thread.parent.as_ref().and_then(|p| p.text.as_deref()), Some("ID: <code>555</code>"));
        assert_eq!(resolved(&thread), None);

        let thread = ThreadMessage::from_message(&copy, |m| (m.id.0 == 77).then_some(9001));
        assert_eq!(thread.recorded_origin, None);
        assert_eq!(resolved(&thread), Some((9001, OriginSource::ParentThreadKey)));

        let thread = ThreadMessage::from_message(&copy, |m| (m.id.0 == 78).then_some(4242));
        assert_eq!(resolved(&thread), Some((4242, OriginSource::ThreadKey)));
    }
}
