//! Logging initialization and startup diagnostics

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to initialize logger
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the effective configuration at startup
///
/// The token itself is never printed, only whether it is present.
pub fn log_startup_configuration(admin_count: usize) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("⚙️  Configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("  • Database: {}", config::DATABASE_PATH.as_str());
    log::info!("  • Backups: {}", config::backup::BACKUP_DIR.as_str());
    log::info!("  • Admin language: {}", config::admin::ADMIN_LANG.as_str());
    log::info!("  • Broadcast delay: {} ms", *config::broadcast::DELAY_MS);

    if config::BOT_TOKEN.is_empty() {
        log::error!("❌ BOT_TOKEN is not set");
    } else {
        log::info!("  • Bot token: set");
    }

    if admin_count == 0 {
        log::warn!("⚠️  ADMINS is empty: feedback will not reach anyone");
        log::warn!("💡 Set ADMINS=<id>[,<id>...] in your .env file");
    } else {
        log::info!("  • Admins: {}", admin_count);
    }
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::NamedTempFile;

    #[test]
    fn test_init_logger_creates_log_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        // The global logger can only be set once per process, so a second
        // initialization inside the same test binary may fail.
        let _ = init_logger(path);

        assert!(temp_file.path().exists());
    }
}
