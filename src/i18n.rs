use std::collections::HashMap;

use fluent_templates::{
    fluent_bundle::{FluentArgs, FluentValue},
    static_loader, Loader,
};
use once_cell::sync::Lazy;
use unic_langid::LanguageIdentifier;

use crate::core::config;
use crate::storage::db::{self, DbPool};

static_loader! {
    static LOCALES = {
        locales: "./locales",
        fallback_language: "uz",
        // Unicode isolation marks around arguments would end up inside
        // `<code>` ids and break reply correlation.
        customise: |bundle| bundle.set_use_isolating(false),
    };
}

/// Interface languages offered by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    Uz,
    En,
    Ru,
}

static UZ: Lazy<LanguageIdentifier> = Lazy::new(|| "uz".parse().unwrap_or_default());
static EN: Lazy<LanguageIdentifier> = Lazy::new(|| "en".parse().unwrap_or_default());
static RU: Lazy<LanguageIdentifier> = Lazy::new(|| "ru".parse().unwrap_or_default());

impl Language {
    pub const ALL: [Language; 3] = [Language::Uz, Language::En, Language::Ru];

    /// Code stored in the database and used in callback data and URLs.
    pub fn code(self) -> &'static str {
        match self {
            Language::Uz => "uz",
            Language::En => "en",
            Language::Ru => "ru",
        }
    }

    /// Parses a language code, accepting region variants like `en-US` or `ru_RU`.
    pub fn from_code(code: &str) -> Option<Self> {
        let normalized = code
            .split(['-', '_'])
            .next()
            .unwrap_or(code)
            .trim()
            .to_lowercase();
        match normalized.as_str() {
            "uz" => Some(Language::Uz),
            "en" => Some(Language::En),
            "ru" => Some(Language::Ru),
            _ => None,
        }
    }

    /// Same as [`Language::from_code`] but falls back to Uzbek.
    pub fn from_code_or_default(code: &str) -> Self {
        Self::from_code(code).unwrap_or_default()
    }

    pub fn identifier(self) -> &'static LanguageIdentifier {
        match self {
            Language::Uz => &UZ,
            Language::En => &EN,
            Language::Ru => &RU,
        }
    }
}

/// Returns a localized string for the given key.
/// Converts literal `\n` sequences to actual newlines for proper Telegram formatting.
pub fn t(lang: Language, key: &str) -> String {
    let text = LOCALES.lookup(lang.identifier(), key).unwrap_or_else(|| {
        LOCALES
            .lookup(Language::default().identifier(), key)
            .unwrap_or_else(|| key.to_string())
    });
    text.replace("\\n", "\n")
}

/// Returns a localized string with arguments for interpolation.
/// Converts literal `\n` sequences to actual newlines for proper Telegram formatting.
pub fn t_args(lang: Language, key: &str, args: &FluentArgs) -> String {
    let args_map: HashMap<String, FluentValue> = args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();

    let text = LOCALES
        .lookup_with_args(lang.identifier(), key, &args_map)
        .unwrap_or_else(|| {
            LOCALES
                .lookup_with_args(Language::default().identifier(), key, &args_map)
                .unwrap_or_else(|| key.to_string())
        });
    text.replace("\\n", "\n")
}

/// Resolves the stored language of a user, Uzbek when unknown.
pub fn user_lang_from_pool(db_pool: &DbPool, telegram_id: i64) -> Language {
    match db::get_connection(db_pool) {
        Ok(conn) => match db::get_user_language(&conn, telegram_id) {
            Ok(Some(code)) => Language::from_code_or_default(&code),
            Ok(None) => Language::default(),
            Err(e) => {
                log::warn!("Failed to read language of user {}: {}", telegram_id, e);
                Language::default()
            }
        },
        Err(e) => {
            log::warn!("Failed to get DB connection for language lookup: {}", e);
            Language::default()
        }
    }
}

/// Language of admin-facing texts (ADMIN_LANG).
pub fn admin_lang() -> Language {
    Language::from_code_or_default(&config::admin::ADMIN_LANG)
}
