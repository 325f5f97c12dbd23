//! Emporium CLI - Operator tools for the storefront backend.
//!
//! # Usage
//!
//! ```bash
//! # Print a cart snapshot
//! em-cli cart show --token 3f0c...
//!
//! # Normalise a listing query string
//! em-cli filters normalize "sort=price_asc&brand=3,1&page=2"
//!
//! # Normalise a category listing query (the category is pinned)
//! em-cli filters normalize "category=7&brand=1" --category 7
//!
//! # List payment providers
//! em-cli providers
//! ```
//!
//! # Commands
//!
//! - `cart show` - Fetch a cart from the backend
//! - `filters normalize` - Print the canonical form of a listing query
//! - `providers` - List payment providers

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "em-cli")]
#[command(author, version, about = "Emporium storefront tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect carts
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Work with listing filter queries
    Filters {
        #[command(subcommand)]
        action: FiltersAction,
    },
    /// List payment providers
    Providers,
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the current snapshot of a cart
    Show {
        /// Cart token
        #[arg(short, long)]
        token: String,
    },
}

#[derive(Subcommand)]
enum FiltersAction {
    /// Print the canonical query string and backend parameters
    Normalize {
        /// Raw query string, with or without the leading `?`
        query: String,

        /// Category id pinned by the listing route
        #[arg(short, long)]
        category: Option<i64>,
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
        Commands::Cart { action } => match action {
            CartAction::Show { token } => commands::cart::show(&token).await?,
        },
        Commands::Filters { action } => match action {
            FiltersAction::Normalize { query, category } => {
                commands::filters::normalize(&query, category)?;
            }
        },
        Commands::Providers => commands::payments::providers().await?,
    }
    Ok(())
}
