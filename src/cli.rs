use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::core::export::EXPORT_FILE_NAME;

#[derive(Parser)]
#[command(name = "kiuf-bot")]
#[command(author, version, about = "Telegram bot of Korea International University in Fergana", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (long polling)
    Run,

    /// Copy the database into the backup directory
    Backup,

    /// Write all registered users to a CSV file
    ExportUsers {
        /// Output file
        #[arg(short, long, default_value = EXPORT_FILE_NAME)]
        output: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
