//! Print recommendations for a session.
//!
//! Usage: `recommend MODEL ITEM_ID...`. Item ids are the external ids of the
//! interaction log; they are translated through the `id_map.json` written
//! by `fit_offline`.
extern crate cinerank;
extern crate failure;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate tracing;
extern crate tracing_subscriber;

use std::env;
use std::fs::File;
use std::io::BufReader;

use failure::format_err;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cinerank::config::Settings;
use cinerank::data::IdMap;
use cinerank::pipeline::ID_MAP_FILENAME;
use cinerank::{ExternalId, Recommender, Registry};

#[derive(Deserialize)]
struct IdMaps {
    items: IdMap,
}

fn main() -> Result<(), failure::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::from_env()?;

    let mut args = env::args().skip(1);
    let model = args
        .next()
        .ok_or_else(|| format_err!("usage: recommend MODEL ITEM_ID..."))?;
    let context: Vec<ExternalId> = args
        .map(|arg| arg.parse::<ExternalId>())
        .collect::<Result<_, _>>()?;

    let id_maps: IdMaps = serde_json::from_reader(BufReader::new(File::open(
        settings.checkpoint_dir.join(ID_MAP_FILENAME),
    )?))?;
    let context: Vec<usize> = context
        .iter()
        .filter_map(|&id| id_maps.items.index_of(id))
        .collect();

    let recommender = Recommender::new(Registry::new(settings.checkpoint_dir.clone()));
    recommender.set_model(&model)?;

    let recommended: Vec<ExternalId> = recommender
        .recommend(&context, settings.top_k)?
        .into_iter()
        .filter_map(|item_id| id_maps.items.id_at(item_id))
        .collect();

    info!(model = %model, count = recommended.len(), "Recommended");
    println!("{}", serde_json::to_string(&recommended)?);

    Ok(())
}
