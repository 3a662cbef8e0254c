//! Command-line interface definition.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// calsync - Google Calendar from the terminal
#[derive(Debug, Parser)]
#[command(name = "calsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, env = "CALSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in with Google in the browser
    Login,

    /// Forget the stored session
    Logout,

    /// List upcoming events
    List,

    /// Create an all-day event
    Create {
        /// Event title
        #[arg(long)]
        title: String,

        /// Day of the event (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Optional description
        #[arg(long)]
        description: Option<String>,
    },

    /// Delete an event by id
    Delete {
        /// Event id as shown by `calsync list`
        id: String,
    },
}
