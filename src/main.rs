use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use tokio::time::sleep;

use kiuf_bot::cli::{Cli, Commands};
use kiuf_bot::core::config::{self, admin::AdminList};
use kiuf_bot::core::export::write_users_csv;
use kiuf_bot::core::{init_logger, log_startup_configuration};
use kiuf_bot::storage::backup::{create_backup, file_size_mb};
use kiuf_bot::storage::{create_pool, db, get_connection};
use kiuf_bot::telegram::bot::wait_for_bot_api;
use kiuf_bot::telegram::{create_bot, schema, setup_bot_commands, Bot, HandlerDeps, HandlerError};

/// Main entry point for the Telegram bot
///
/// Parses CLI arguments and dispatches to appropriate subcommand.
///
/// # Errors
/// Returns an error if initialization fails (logging, database, bot creation).
#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up global panic handler to catch panics in dispatcher
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
        if let Some(msg) = panic_info.payload().downcast_ref::<&str>() {
            log::error!("Panic message: {}", msg);
        }
    }));

    // Load environment variables from .env if present, before any config is read
    let _ = dotenv();

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Run) => run_bot().await,
        Some(Commands::Backup) => run_backup(),
        Some(Commands::ExportUsers { output }) => run_export(output),
        None => {
            // No command specified - default to running the bot
            log::info!("No command specified, running bot in default mode");
            run_bot().await
        }
    }
}

/// Create a database backup and print its path
fn run_backup() -> Result<()> {
    let backup_path = create_backup(&config::DATABASE_PATH, Path::new(config::backup::BACKUP_DIR.as_str()))?;
    let size = file_size_mb(&backup_path).unwrap_or(0.0);
    log::info!("Backup created: {} ({:.2} MB)", backup_path.display(), size);
    println!("{}", backup_path.display());
    Ok(())
}

/// Write the users CSV export to `output`
fn run_export(output: PathBuf) -> Result<()> {
    let pool = create_pool(&config::DATABASE_PATH)?;
    let conn = get_connection(&pool)?;
    let users = db::get_all_users(&conn)?;
    write_users_csv(&users, &output)?;
    log::info!("Exported {} users to {}", users.len(), output.display());
    println!("{}", output.display());
    Ok(())
}

async fn run_bot() -> Result<()> {
    let bot_init_start = std::time::Instant::now();
    log::info!("Starting bot...");

    let bot = create_bot()?;
    let me = wait_for_bot_api(&bot).await?;
    log::info!("Bot username: {:?}, Bot ID: {}", me.username.as_deref(), me.id);

    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let db_pool = Arc::new(create_pool(&config::DATABASE_PATH)?);
    let admins = Arc::new(AdminList::from_env());
    if admins.is_empty() {
        log::warn!("ADMINS is empty: feedback and new-user notifications will not be delivered");
    }
    log_startup_configuration(admins.ids().len());

    let handler = schema(HandlerDeps::new(db_pool, admins));

    log::info!("================================================");
    log::info!("🎉 Bot initialization complete in {:.2}s", bot_init_start.elapsed().as_secs_f64());
    log::info!("📡 Ready to receive updates!");
    log::info!("================================================");

    run_dispatcher(bot, handler).await;
    Ok(())
}

/// Polls for updates, restarting the dispatcher with backoff if it panics
async fn run_dispatcher(bot: Bot, handler: UpdateHandler<HandlerError>) {
    let max_restarts = config::retry::MAX_DISPATCHER_RESTARTS;
    let mut restarts = 0;

    loop {
        let bot = bot.clone();
        let handler = handler.clone();
        let task = tokio::spawn(async move {
            let listener = Polling::builder(bot.clone()).drop_pending_updates().build();
            Dispatcher::builder(bot, handler)
                .enable_ctrlc_handler()
                .build()
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await
        });

        match task.await {
            Ok(()) => {
                log::info!("Dispatcher shutdown gracefully");
                return;
            }
            Err(e) if e.is_panic() && restarts < max_restarts => {
                restarts += 1;
                let delay = config::retry::restart_delay(restarts);
                log::error!(
                    "Dispatcher panicked: {}. Restarting in {}s (attempt {}/{})",
                    e,
                    delay.as_secs(),
                    restarts,
                    max_restarts
                );
                sleep(delay).await;
            }
            Err(e) => {
                log::error!("Dispatcher stopped: {}", e);
                return;
            }
        }
    }
}
