//! Common test utilities
//!
//! This module is shared across all integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;
use teloxide::types::{ChatId, MessageId};
use teloxide::{ApiError, RequestError};

use kiuf_bot::storage::db::{self, DbPool, User};
use kiuf_bot::storage::{create_pool, get_connection};
use kiuf_bot::telegram::relay::{OutgoingMessage, Transport};

/// Transport that records every message instead of calling Telegram.
///
/// Chats listed in `blocked` fail with `BotBlocked`, like users who stopped the bot.
pub struct MockTransport {
    sent: Mutex<Vec<(ChatId, OutgoingMessage)>>,
    blocked: HashSet<i64>,
    next_id: Mutex<i32>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::blocking(&[])
    }

    pub fn blocking(chat_ids: &[i64]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            blocked: chat_ids.iter().copied().collect(),
            next_id: Mutex::new(100),
        }
    }

    pub fn sent(&self) -> Vec<(ChatId, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter(|(chat, _)| chat.0 == chat_id)
            .map(|(_, message)| message)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn deliver(&self, chat_id: ChatId, message: &OutgoingMessage) -> Result<MessageId, RequestError> {
        if self.blocked.contains(&chat_id.0) {
            return Err(RequestError::Api(ApiError::BotBlocked));
        }

        self.sent.lock().unwrap().push((chat_id, message.clone()));
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        Ok(MessageId(*next_id))
    }
}

/// A migrated database in a temporary directory.
///
/// Keep the `TempDir` alive for as long as the pool is used.
pub fn test_pool() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let pool = create_pool(path.to_str().unwrap()).unwrap();
    (dir, pool)
}

/// Registers a user with the given language and returns the stored row.
pub fn add_user(pool: &DbPool, telegram_id: i64, full_name: &str, language: &str) -> User {
    let conn = get_connection(pool).unwrap();
    db::create_user(&conn, telegram_id, None, Some(full_name), language).unwrap();
    db::get_user(&conn, telegram_id).unwrap().unwrap()
}
