#[macro_use]
extern crate log;
#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;
pub mod teller;

pub use config::Config;

use crate::config::{ConfigFairing, DatabaseFairing};
use crate::logging::LoggerFairing;
use crate::store::Store;
use crate::teller::PhaseCoordinatorFairing;

/// Build the server from `Rocket.toml` and `ROCKET_*` environment variables.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(PhaseCoordinatorFairing)
        .mount("/", api::routes())
}

/// Build the server around an existing store and config.
pub fn rocket_for_store(store: Store, config: Config) -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .manage(config)
        .manage(store)
        .attach(PhaseCoordinatorFairing)
        .mount("/", api::routes())
}

/// The temporary directory a `#[backend_test]` runs in.
#[cfg(test)]
pub type Workspace = std::path::PathBuf;
