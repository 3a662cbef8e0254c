//! calsync CLI entry point.

mod cli;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use calsync_calendar::{CalendarEvent, NewEvent};
use calsync_core::Config;
use calsync_sync::{build_orchestrator, AppOrchestrator, ScreenState, SignIn, SyncError};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = calsync_core::init(cli.debug) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("{:?}", e);
            match e.downcast_ref::<SyncError>() {
                Some(sync) => eprintln!("error: {}", sync.user_message()),
                None => eprintln!("error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (config, _) = Config::load_validated(cli.config.as_deref())
        .map_err(SyncError::from)
        .context("loading configuration")?;
    let mut orchestrator = build_orchestrator(&config)?;

    match cli.command {
        Command::Login => match orchestrator.sign_in().await? {
            SignIn::Completed => {
                println!("Signed in.");
                print_events(orchestrator.events());
            }
            SignIn::Cancelled => println!("Sign-in cancelled."),
        },
        Command::Logout => {
            orchestrator.sign_out().await?;
            println!("Signed out.");
        }
        Command::List => {
            activate(&mut orchestrator).await?;
            print_events(orchestrator.events());
        }
        Command::Create {
            title,
            date,
            description,
        } => {
            activate(&mut orchestrator).await?;
            let mut event = NewEvent::all_day(title, date);
            if let Some(description) = description {
                event = event.with_description(description);
            }
            println!("Creating \"{}\" on {}", event.summary, date);
            orchestrator.create_event(event).await?;
            print_events(orchestrator.events());
        }
        Command::Delete { id } => {
            activate(&mut orchestrator).await?;
            orchestrator.delete_event(&id).await?;
            println!("Deleted {}.", id);
            print_events(orchestrator.events());
        }
    }

    Ok(())
}

/// Restore the stored session; without one there is nothing to operate on.
async fn activate(orchestrator: &mut AppOrchestrator) -> Result<(), SyncError> {
    match orchestrator.activate().await? {
        ScreenState::Ready => Ok(()),
        ScreenState::SignInRequired | ScreenState::ReauthorizationRequired => {
            Err(SyncError::NotSignedIn)
        }
    }
}

fn print_events(events: &[CalendarEvent]) {
    if events.is_empty() {
        println!("No upcoming events.");
        return;
    }
    for event in events {
        println!("{}", format_event(event));
    }
}

fn format_event(event: &CalendarEvent) -> String {
    format!("{}  {}  ({})", event.display_start(), event.display_title(), event.id)
}
