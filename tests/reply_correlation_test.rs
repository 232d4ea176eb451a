//! Integration tests for admin reply correlation
//!
//! Run with: cargo test --test reply_correlation_test

use pretty_assertions::assert_eq;

use kiuf_bot::telegram::correlator::{resolve_origin, OriginSource, ThreadMessage};
use kiuf_bot::telegram::feedback::feedback_notification_text;
use kiuf_bot::telegram::notifications::new_user_notification_text;
use kiuf_bot::telegram::RelayError;
use kiuf_bot::i18n::Language;
use kiuf_bot::storage::db::User;

fn user(telegram_id: i64) -> User {
    User {
        id: 1,
        telegram_id,
        username: Some("ali".to_string()),
        full_name: Some("Ali Valiyev".to_string()),
        phone_number: None,
        language: "uz".to_string(),
        created_at: "2025-06-01 10:00:00".to_string(),
        updated_at: "2025-06-01 10:00:00".to_string(),
    }
}

#[test]
fn feedback_notification_resolves_in_every_language() {
    for lang in Language::ALL {
        let text = feedback_notification_text(lang, 123, "Ali", Some("ali"));
        let origin = resolve_origin(&ThreadMessage::with_text(text)).unwrap();
        assert_eq!(origin.user_id, 123, "language {:?}", lang);
        assert_eq!(origin.source, OriginSource::Text);
    }
}

#[test]
fn plain_user_id_marker() {
    let msg = ThreadMessage::with_text("💬 Feedback\n🆔 User ID: <code>123</code>\nSalom");
    assert_eq!(resolve_origin(&msg).unwrap().user_id, 123);
}

#[test]
fn new_user_notification_resolves() {
    let text = new_user_notification_text(Language::En, &user(987654321));
    let origin = resolve_origin(&ThreadMessage::with_text(text)).unwrap();
    assert_eq!(origin.user_id, 987654321);
}

#[test]
fn single_id_marker() {
    let msg = ThreadMessage::with_text("💬 <b>Yangi xabar</b>\n🆔 <b>ID:</b> <code>777</code>");
    assert_eq!(resolve_origin(&msg).unwrap().user_id, 777);
}

#[test]
fn last_of_two_id_markers_wins() {
    let msg = ThreadMessage::with_text("🆔 <b>ID:</b> <code>111</code>\n...\n🆔 <b>ID:</b> <code>222</code>");
    assert_eq!(resolve_origin(&msg).unwrap().user_id, 222);
}

#[test]
fn user_id_marker_beats_plain_id_marker() {
    let msg = ThreadMessage::with_text("🆔 <b>ID:</b> <code>111</code>\n🆔 <b>User ID:</b> <code>333</code>");
    assert_eq!(resolve_origin(&msg).unwrap().user_id, 333);
}

#[test]
fn reply_to_copied_content_uses_header_above() {
    let header = feedback_notification_text(Language::Uz, 4242, "Ali", None);
    let copy = ThreadMessage::with_caption("photo without markers").replying_to(ThreadMessage::with_text(header));

    let origin = resolve_origin(&copy).unwrap();
    assert_eq!(origin.user_id, 4242);
    assert_eq!(origin.source, OriginSource::ParentText);
}

#[test]
fn recorded_thread_key_wins_over_text() {
    let msg = ThreadMessage {
        recorded_origin: Some(1),
        ..ThreadMessage::with_text("🆔 <b>ID:</b> <code>2</code>")
    };
    let origin = resolve_origin(&msg).unwrap();
    assert_eq!(origin.user_id, 1);
    assert_eq!(origin.source, OriginSource::ThreadKey);
}

#[test]
fn nothing_to_correlate() {
    let msg = ThreadMessage::with_text("hello").replying_to(ThreadMessage::with_text("no markers here"));
    assert!(matches!(resolve_origin(&msg), Err(RelayError::UnresolvedOrigin)));
    assert!(matches!(resolve_origin(&ThreadMessage::default()), Err(RelayError::UnresolvedOrigin)));
}
