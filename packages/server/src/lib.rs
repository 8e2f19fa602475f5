#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the quote grid.
//!
//! Serves quotes, ranges and tiered grid selections from one shared
//! [`QuoteSession`]. Caller-input errors become `400 Bad Request`; every
//! other failure degrades inside the orchestrator into short results or
//! placeholder cells.

mod handlers;

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use quote_grid_orchestrator::{ConfigError, GridSelection, OrchestratorConfig, QuoteSession};
use quote_grid_scraper::{ScrapeConfig, ScrapeError, SourceKind, build_source};

/// Source URL used when none is configured.
pub const DEFAULT_SOURCE_URL: &str = "https://quotes.toscrape.com";

/// Errors raised while setting up the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The orchestrator configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The source settings are invalid.
    #[error(transparent)]
    Source(#[from] ScrapeError),
}

/// Where quotes come from and how the orchestrator is tuned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSettings {
    /// Base URL of the upstream source.
    pub source_url: Option<String>,
    /// `html` or `json`.
    pub source_kind: Option<String>,
    /// Orchestrator TOML configuration file.
    pub config_path: Option<PathBuf>,
}

impl SourceSettings {
    /// Reads `QUOTE_GRID_SOURCE_URL`, `QUOTE_GRID_SOURCE_KIND` and
    /// `QUOTE_GRID_CONFIG`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            source_url: std::env::var("QUOTE_GRID_SOURCE_URL").ok(),
            source_kind: std::env::var("QUOTE_GRID_SOURCE_KIND").ok(),
            config_path: std::env::var("QUOTE_GRID_CONFIG").ok().map(PathBuf::from),
        }
    }

    /// Fills unset fields from `fallback`.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            source_url: self.source_url.or(fallback.source_url),
            source_kind: self.source_kind.or(fallback.source_kind),
            config_path: self.config_path.or(fallback.config_path),
        }
    }

    /// Loads the orchestrator configuration, or the defaults when no file
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the file cannot be read or parsed.
    pub fn load_config(&self) -> Result<OrchestratorConfig, ServerError> {
        Ok(match &self.config_path {
            Some(path) => OrchestratorConfig::load(path)?,
            None => OrchestratorConfig::default(),
        })
    }

    /// Builds a session over the configured source.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the configuration cannot be loaded or the
    /// source kind is unknown.
    pub fn build_session(&self) -> Result<QuoteSession, ServerError> {
        let config = self.load_config()?;
        let kind = self
            .source_kind
            .as_deref()
            .map(str::parse::<SourceKind>)
            .transpose()?
            .unwrap_or_default();
        let url = self.source_url.as_deref().unwrap_or(DEFAULT_SOURCE_URL);

        log::info!("Using {kind:?} quote source at {url}");
        Ok(QuoteSession::new(build_source(kind, ScrapeConfig::new(url)), config))
    }
}

/// Live selections kept by a default [`SelectionRegistry`].
pub const DEFAULT_MAX_SELECTIONS: usize = 256;

#[derive(Debug, Default)]
struct Selections {
    by_id: BTreeMap<String, Arc<GridSelection>>,
    order: VecDeque<String>,
}

/// Live grid selections, keyed by id.
///
/// Holds at most `capacity` selections; inserting past that drops the
/// oldest.
#[derive(Debug)]
pub struct SelectionRegistry {
    selections: RwLock<Selections>,
    capacity: usize,
}

impl Default for SelectionRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SELECTIONS)
    }
}

impl SelectionRegistry {
    /// Creates a registry holding at most `capacity` selections (at least
    /// one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            selections: RwLock::new(Selections::default()),
            capacity: capacity.max(1),
        }
    }

    /// Stores `selection` under a fresh id and returns the id, evicting the
    /// oldest selections beyond capacity.
    pub fn insert(&self, selection: GridSelection) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut selections = self
            .selections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        selections.by_id.insert(id.clone(), Arc::new(selection));
        selections.order.push_back(id.clone());

        while selections.by_id.len() > self.capacity {
            let Some(oldest) = selections.order.pop_front() else {
                break;
            };
            if selections.by_id.remove(&oldest).is_some() {
                log::debug!("Evicted selection {oldest}");
            }
        }
        id
    }

    /// Looks up a selection.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<GridSelection>> {
        self.selections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(id)
            .cloned()
    }

    /// Drops a selection. Its in-flight batches finish unobserved.
    pub fn remove(&self, id: &str) -> bool {
        let mut selections = self
            .selections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if selections.by_id.remove(id).is_none() {
            return false;
        }
        selections.order.retain(|existing| existing != id);
        true
    }

    /// Number of live selections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.selections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    /// Whether there are no live selections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most selections kept at once.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// The fetch session shared by every request.
    pub session: Arc<QuoteSession>,
    /// Grid selections created through the API.
    pub selections: SelectionRegistry,
}

impl AppState {
    /// Creates state around `session`.
    #[must_use]
    pub fn new(session: Arc<QuoteSession>) -> Self {
        Self::with_max_selections(session, DEFAULT_MAX_SELECTIONS)
    }

    /// Creates state around `session` keeping at most `max_selections`
    /// live selections.
    #[must_use]
    pub fn with_max_selections(session: Arc<QuoteSession>, max_selections: usize) -> Self {
        Self {
            session,
            selections: SelectionRegistry::with_capacity(max_selections),
        }
    }
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/quotes/random", web::get().to(handlers::random_quotes))
            .route("/quotes/range", web::get().to(handlers::quote_range))
            .route("/quotes/{id}/link", web::get().to(handlers::quote_link))
            .route("/stats", web::get().to(handlers::stats))
            .route("/metadata", web::get().to(handlers::metadata))
            .route("/selections", web::post().to(handlers::create_selection))
            .route("/selections/{id}", web::get().to(handlers::get_selection))
            .route("/selections/{id}", web::delete().to(handlers::delete_selection))
            .route(
                "/selections/{id}/scroll",
                web::post().to(handlers::scroll_selection),
            ),
    );
}

/// Starts the quote grid API server.
///
/// Binds to `BIND_ADDR:PORT` (default `127.0.0.1:8080`) and serves until
/// stopped, then shuts the session down. The caller provides the async
/// runtime (e.g. via `#[actix_web::main]`) and initialises logging.
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server(state: web::Data<AppState>) -> std::io::Result<()> {
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    let app_state = state.clone();
    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(app_state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await?;

    state.session.shutdown();
    Ok(())
}
