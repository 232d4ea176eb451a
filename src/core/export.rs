//! User list export for admins

use std::path::Path;

use crate::storage::db::User;

/// File name used when the export is sent as a Telegram document
pub const EXPORT_FILE_NAME: &str = "users_export.csv";

/// Quotes a CSV field, doubling inner quotes and flattening newlines
fn csv_field(value: &str) -> String {
    let flat = value.replace(['\r', '\n'], " ");
    format!("\"{}\"", flat.replace('"', "\"\""))
}

/// Renders users as CSV with a header row
pub fn users_to_csv(users: &[User]) -> String {
    let mut content = "ID,Telegram ID,Full name,Username,Phone,Language,Registered at\n".to_string();

    for user in users {
        let username = user.username.as_deref().map(|u| format!("@{}", u)).unwrap_or_default();
        content.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            user.id,
            user.telegram_id,
            csv_field(user.full_name.as_deref().unwrap_or("")),
            csv_field(&username),
            csv_field(user.phone_number.as_deref().unwrap_or("")),
            user.language,
            user.created_at
        ));
    }

    content
}

/// Writes the CSV export to `path`
pub fn write_users_csv(users: &[User], path: &Path) -> std::io::Result<()> {
    std::fs::write(path, users_to_csv(users))
}
