//! Handler types, dependencies, and user registration helpers

use std::sync::Arc;
use std::time::Duration;

use teloxide::types::Message;

use crate::core::config::{self, admin::AdminList};
use crate::storage::db::{self, DbPool, User};
use crate::storage::get_connection;
use crate::telegram::session::SessionStore;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub db_pool: Arc<DbPool>,
    pub admins: Arc<AdminList>,
    pub sessions: SessionStore,
    pub broadcast_delay: Duration,
}

impl HandlerDeps {
    /// Create new handler dependencies
    pub fn new(db_pool: Arc<DbPool>, admins: Arc<AdminList>) -> Self {
        Self {
            db_pool,
            admins,
            sessions: SessionStore::new(),
            broadcast_delay: config::broadcast::delay(),
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.is_admin(user_id)
    }
}

/// Sender of a private message, as reported by Telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub full_name: String,
}

impl Sender {
    /// Extract the sender of a Telegram message
    pub fn from_message(msg: &Message) -> Option<Self> {
        let user = msg.from.as_ref()?;
        Some(Self {
            id: i64::try_from(user.id.0).ok()?,
            username: user.username.clone(),
            full_name: user.full_name(),
        })
    }
}

/// Result of [`register_sender`]
pub struct Registration {
    pub user: User,
    pub is_new: bool,
}

/// Creates the user on first contact and refreshes name and username later on.
pub fn register_sender(db_pool: &DbPool, sender: &Sender) -> Result<Registration, crate::core::AppError> {
    let conn = get_connection(db_pool)?;
    let (user, is_new) = db::get_or_create_user(
        &conn,
        sender.id,
        sender.username.as_deref(),
        Some(sender.full_name.as_str()),
    )?;
    if is_new {
        log::info!("👤 New user registered: {} ({})", sender.id, sender.full_name);
    }
    Ok(Registration { user, is_new })
}
