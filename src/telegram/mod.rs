//! Telegram bot integration and handlers

pub mod admin;
pub mod bot;
pub mod correlator;
pub mod feedback;
pub mod handlers;
pub mod menu;
pub mod notifications;
pub mod relay;
pub mod session;

use teloxide::types::InlineKeyboardButton;

pub use teloxide::Bot;

// Re-exports for convenience
pub use bot::{create_bot, setup_bot_commands, Command};
pub use correlator::{resolve_origin, Origin, OriginSource, ThreadMessage};
pub use handlers::{schema, HandlerDeps, HandlerError};
pub use relay::{
    broadcast, relay_admin_reply, reply_to_thread, AdminReply, Attachment, BroadcastReport, OutgoingMessage,
    RelayError, Transport, UserDirectory,
};
pub use session::{PendingInput, SessionStore};

/// Inline keyboard button with callback data
pub fn cb(text: impl Into<String>, data: impl Into<String>) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, data)
}
