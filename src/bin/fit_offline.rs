//! Train, evaluate and persist a model.
//!
//! Usage: `fit_offline [MODEL]`. Everything else comes from `CINERANK_*`
//! settings (see `cinerank::config`). The run report is printed as JSON.
extern crate cinerank;
extern crate failure;
extern crate serde_json;
extern crate tracing;
extern crate tracing_subscriber;

use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cinerank::config::Settings;
use cinerank::data::Interactions;
use cinerank::{datasets, pipeline};

fn main() -> Result<(), failure::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut settings = Settings::from_env()?;
    if let Some(model) = env::args().nth(1) {
        settings.model = model;
    }

    info!(
        model = %settings.model,
        path = %settings.interactions_path.display(),
        "Starting offline fit"
    );

    let log = datasets::load_log(&settings.interactions_path)?;
    let interactions = Interactions::from_log(&log);
    let report = pipeline::run(&interactions, &settings.pipeline())?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
