#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for the quote grid.
//!
//! ```text
//! quote_grid random [--count 10]
//! quote_grid range [--offset 0] [--limit 100]
//! quote_grid metadata
//! quote_grid stats
//! quote_grid select --total 1500
//! quote_grid serve
//! ```
//!
//! Every command except `serve` prints JSON to stdout. Source flags fall
//! back to `QUOTE_GRID_SOURCE_URL`, `QUOTE_GRID_SOURCE_KIND` and
//! `QUOTE_GRID_CONFIG`.

use std::path::PathBuf;
use std::sync::Arc;

use actix_web::web;
use clap::{Parser, Subcommand};
use quote_grid_orchestrator::{GridSelection, QuoteSession};
use quote_grid_orchestrator_models::{ScrollOutcome, SelectionMode};
use quote_grid_server::{AppState, SourceSettings, run_server};
use quote_grid_server_models::{ApiQuotes, DEFAULT_RANDOM_COUNT, DEFAULT_RANGE_LIMIT};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "quote_grid",
    about = "Fetch quotes from a paginated source and fill grid selections"
)]
struct Cli {
    /// Base URL of the quote source
    #[arg(long, global = true)]
    source_url: Option<String>,
    /// Source kind: html or json
    #[arg(long, global = true)]
    source_kind: Option<String>,
    /// Orchestrator configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a random sample of quotes
    Random {
        /// Number of quotes
        #[arg(long, default_value_t = DEFAULT_RANDOM_COUNT)]
        count: u64,
    },
    /// Print the quotes at a logical range
    Range {
        /// First position
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Number of positions
        #[arg(long, default_value_t = DEFAULT_RANGE_LIMIT)]
        limit: u64,
    },
    /// Walk the source and print its page metadata
    Metadata,
    /// Print session counters after the metadata walk
    Stats,
    /// Fill a grid selection through the tiered schedule
    Select {
        /// Number of grid positions
        #[arg(long)]
        total: u64,
    },
    /// Start the API server
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    let settings = SourceSettings {
        source_url: cli.source_url,
        source_kind: cli.source_kind,
        config_path: cli.config,
    }
    .or(SourceSettings::from_env());
    let session = Arc::new(settings.build_session()?);

    match cli.command {
        Commands::Random { count } => {
            let items = session.get_random_items(count).await?;
            print_json(&ApiQuotes::from(items))?;
        }
        Commands::Range { offset, limit } => {
            print_json(&session.get_range(offset, limit).await?)?;
        }
        Commands::Metadata => {
            print_json(&session.metadata().await)?;
        }
        Commands::Stats => {
            session.metadata().await;
            print_json(&session.get_stats())?;
        }
        Commands::Select { total } => {
            let selection = GridSelection::start(Arc::clone(&session), total).await?;
            fill_selection(&session, &selection).await?;
            print_json(&selection.snapshot())?;
        }
        Commands::Serve => {
            session.initialize().await?;
            let state = web::Data::new(AppState::new(Arc::clone(&session)));

            // The server runs on actix-web's own runtime, so it gets a
            // blocking thread instead of nesting inside this one.
            tokio::task::spawn_blocking(move || {
                actix_web::rt::System::new().block_on(run_server(state))
            })
            .await??;
        }
    }

    session.shutdown();
    Ok(())
}

/// Drives `selection` until every position has settled.
///
/// Staggered selections fill themselves. Virtually scrolled ones are fed a
/// scroll signal once per debounce window, as a client scrolling steadily
/// to the bottom would.
async fn fill_selection(
    session: &QuoteSession,
    selection: &GridSelection,
) -> Result<(), Box<dyn std::error::Error>> {
    match selection.mode() {
        SelectionMode::Immediate => {}
        SelectionMode::Staggered => {
            log::info!("Waiting for staggered batches of {}", selection.total());
            selection.wait_staggered().await;
        }
        SelectionMode::VirtualScroll => {
            let debounce = session.config().schedule.scroll_debounce();
            loop {
                match selection.on_scroll(None).await? {
                    ScrollOutcome::Loaded { range } => {
                        log::info!("Loaded positions {}..{}", range.offset, range.end());
                    }
                    ScrollOutcome::Debounced | ScrollOutcome::Busy => {}
                    ScrollOutcome::Complete | ScrollOutcome::NotScrollable => break,
                }
                tokio::time::sleep(debounce).await;
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
