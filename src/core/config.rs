use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: kiuf_bot.db
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "kiuf_bot.db".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: kiuf_bot.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "kiuf_bot.log".to_string()));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Custom Bot API server URL (local telegram-bot-api), if any
pub static BOT_API_URL: Lazy<Option<String>> = Lazy::new(|| {
    env::var("BOT_API_URL").ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
});

/// Public links shown in the menus
pub mod links {
    /// Base of the 360° virtual tour, the language code is appended
    pub const TOUR_360_BASE: &str = "https://ukiu.uz";

    /// Developer contact
    pub const DEVELOPER_URL: &str = "https://t.me/asadbek_074";

    /// Admission pages are published as images on the university site
    pub const ADMISSION_QUOTAS_IMAGE: &str = "https://ukiu.uz/media/qabul/photo_2025-06-13_09-58-55.jpg";
    pub const ADMISSION_DEADLINES_IMAGE: &str = "https://ukiu.uz/media/qabul/photo_2025-06-13_09-58-40.jpg";
    pub const CONTRACT_PAYMENTS_IMAGE: &str = "https://ukiu.uz/media/qabul/photo_2025-06-13_13-11-49.jpg";
    pub const KOREAN_BENEFIT_IMAGE: &str = "https://ukiu.uz/media/qabul/00222221.png";

    /// Builds the 360° tour URL for a language code (`uz`, `en`, `ru`)
    pub fn tour_360(lang_code: &str) -> String {
        format!("{}/{}/sphere/1/", TOUR_360_BASE, lang_code)
    }
}

/// Broadcast configuration
pub mod broadcast {
    use super::Duration;
    use once_cell::sync::Lazy;
    use std::env;

    /// Delay between two broadcast sends (milliseconds)
    /// Read from BROADCAST_DELAY_MS environment variable
    /// Default: 50
    pub static DELAY_MS: Lazy<u64> = Lazy::new(|| {
        env::var("BROADCAST_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50)
    });

    pub fn delay() -> Duration {
        Duration::from_millis(*DELAY_MS)
    }
}

/// Backup configuration
pub mod backup {
    use once_cell::sync::Lazy;
    use std::env;

    /// Maximum number of kept backups
    pub const MAX_BACKUPS: usize = 30;

    /// Backup directory
    /// Read from BACKUP_DIR environment variable
    /// Default: backups
    pub static BACKUP_DIR: Lazy<String> =
        Lazy::new(|| env::var("BACKUP_DIR").unwrap_or_else(|_| "backups".to_string()));
}

/// Admin panel configuration
pub mod panel {
    /// Users shown by /allusers
    pub const USERS_PAGE_SIZE: usize = 20;

    /// Telegram rejects messages longer than 4096 characters
    pub const MAX_MESSAGE_LENGTH: usize = 4000;
}

/// Retry configuration
pub mod retry {
    use super::Duration;

    /// Dispatcher restarts after a panic before the bot gives up
    pub const MAX_DISPATCHER_RESTARTS: u32 = 5;

    /// Delay before the first dispatcher restart (in seconds)
    pub const DISPATCHER_RETRY_DELAY_SECS: u64 = 5;

    /// Base for exponential backoff calculation
    pub const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

    /// Attempts at reaching the Bot API on startup
    pub const STARTUP_MAX_RETRIES: u32 = 60;

    /// Delay between startup attempts (in seconds)
    pub const STARTUP_RETRY_DELAY_SECS: u64 = 5;

    pub fn startup_delay() -> Duration {
        Duration::from_secs(STARTUP_RETRY_DELAY_SECS)
    }

    /// Backoff before dispatcher restart number `attempt` (1-based): 5s, 10s, 20s...
    pub fn restart_delay(attempt: u32) -> Duration {
        let factor = EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1));
        Duration::from_secs(DISPATCHER_RETRY_DELAY_SECS.saturating_mul(factor))
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for HTTP requests (in seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;

    /// Request timeout duration
    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Admin configuration
pub mod admin {
    use once_cell::sync::Lazy;
    use std::env;

    /// Parses a list of Telegram ids separated by commas or whitespace.
    /// Entries that are not numbers are skipped.
    pub fn parse_admin_ids(raw: &str) -> Vec<i64> {
        raw.split([',', ' ', '\n', '\t'])
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    }

    /// Admin user IDs (comma-separated)
    /// Read from ADMINS environment variable
    pub static ADMINS: Lazy<Vec<i64>> = Lazy::new(|| {
        env::var("ADMINS")
            .ok()
            .map(|raw| parse_admin_ids(&raw))
            .unwrap_or_default()
    });

    /// Language of admin-facing texts
    /// Read from ADMIN_LANG environment variable
    /// Default: uz
    pub static ADMIN_LANG: Lazy<String> = Lazy::new(|| env::var("ADMIN_LANG").unwrap_or_else(|_| "uz".to_string()));

    /// Set of administrators, resolved once at startup and handed to handlers.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct AdminList {
        ids: Vec<i64>,
    }

    impl AdminList {
        pub fn new(ids: Vec<i64>) -> Self {
            let mut ids = ids;
            ids.sort_unstable();
            ids.dedup();
            Self { ids }
        }

        /// Admin list from the ADMINS environment variable
        pub fn from_env() -> Self {
            Self::new(ADMINS.clone())
        }

        pub fn is_admin(&self, user_id: i64) -> bool {
            self.ids.binary_search(&user_id).is_ok()
        }

        pub fn ids(&self) -> &[i64] {
            &self.ids
        }

        pub fn is_empty(&self) -> bool {
            self.ids.is_empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::admin::{parse_admin_ids, AdminList};
    use super::*;

    #[test]
    fn test_parse_admin_ids_mixed_separators() {
        assert_eq!(parse_admin_ids("1, 2\n3\t4"), vec![1, 2, 3, 4]);
        assert_eq!(parse_admin_ids("12,abc,,34"), vec![12, 34]);
        assert!(parse_admin_ids("").is_empty());
    }

    #[test]
    fn test_admin_list_lookup() {
        let admins = AdminList::new(vec![300, 100, 200, 100]);
        assert!(admins.is_admin(100));
        assert!(admins.is_admin(300));
        assert!(!admins.is_admin(42));
        assert_eq!(admins.ids(), &[100, 200, 300]);
        assert!(AdminList::default().is_empty());
    }

    #[test]
    fn test_tour_url() {
        assert_eq!(links::tour_360("en"), "https://ukiu.uz/en/sphere/1/");
    }

    #[test]
    fn test_restart_backoff() {
        assert_eq!(retry::restart_delay(1), Duration::from_secs(5));
        assert_eq!(retry::restart_delay(2), Duration::from_secs(10));
        assert_eq!(retry::restart_delay(retry::MAX_DISPATCHER_RESTARTS), Duration::from_secs(80));
        assert_eq!(retry::restart_delay(0), Duration::from_secs(5));
    }

    #[test]
    fn test_durations() {
        assert_eq!(retry::startup_delay(), Duration::from_secs(5));
        assert_eq!(network::timeout(), Duration::from_secs(60));
    }
}
