//! Per-user pending input for multi-step flows
//!
//! Some buttons ask for one follow-up message (feedback text, broadcast post,
//! admin reply). The expected input is kept here until that message arrives.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

/// What the next message of a user is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingInput {
    /// Feedback for the admins
    Feedback,
    /// Post to send to every user (admins only)
    Broadcast,
    /// Reply to the given user (admins only)
    ReplyTo(i64),
}

/// Shared store of pending inputs keyed by Telegram user id.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<i64, PendingInput>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: i64, input: PendingInput) {
        self.inner.lock().await.insert(user_id, input);
    }

    pub async fn get(&self, user_id: i64) -> Option<PendingInput> {
        self.inner.lock().await.get(&user_id).copied()
    }

    /// Removes and returns the pending input, so each one is consumed once.
    pub async fn take(&self, user_id: i64) -> Option<PendingInput> {
        self.inner.lock().await.remove(&user_id)
    }

    pub async fn clear(&self, user_id: i64) {
        self.inner.lock().await.remove(&user_id);
    }
}
