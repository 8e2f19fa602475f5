#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Quote grid API server binary.
//!
//! Reads the source settings from `QUOTE_GRID_SOURCE_URL`,
//! `QUOTE_GRID_SOURCE_KIND` and `QUOTE_GRID_CONFIG`, walks the source once
//! and serves on `BIND_ADDR:PORT`.

use std::sync::Arc;

use actix_web::web;
use quote_grid_server::{AppState, SourceSettings, run_server};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let session = Arc::new(SourceSettings::from_env().build_session()?);
    session.initialize().await?;

    run_server(web::Data::new(AppState::new(session))).await?;
    Ok(())
}
