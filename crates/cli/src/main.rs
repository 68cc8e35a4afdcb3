//! Atelier CLI - Database migrations and operator tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! atelier-cli migrate
//!
//! # Grant bundle sessions to a retailer
//! atelier-cli credits grant --retailer 6f1c...-... --sessions 25 --reason "support ticket 812"
//!
//! # Print the plan and bundle catalog
//! atelier-cli plans
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `credits grant` - Add bundle sessions with a ledger entry
//! - `plans` - Print the catalog

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use uuid::Uuid;

mod commands;

#[derive(Parser)]
#[command(name = "atelier-cli")]
#[command(author, version, about = "Atelier CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage retailer session credits
    Credits {
        #[command(subcommand)]
        action: CreditsAction,
    },
    /// Print the plan and bundle catalog
    Plans,
}

#[derive(Subcommand)]
enum CreditsAction {
    /// Add bundle sessions to a retailer
    Grant {
        /// Retailer id
        #[arg(short, long)]
        retailer: Uuid,

        /// Number of sessions to add
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=100_000))]
        sessions: u32,

        /// Reason recorded in the ledger
        #[arg(long, default_value = "manual grant")]
        reason: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Credits { action } => match action {
            CreditsAction::Grant {
                retailer,
                sessions,
                reason,
            } => {
                commands::credits::grant(retailer.into(), sessions, &reason).await?;
            }
        },
        Commands::Plans => commands::plans::print(),
    }
    Ok(())
}
