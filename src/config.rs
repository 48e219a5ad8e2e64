use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::mongodb::ensure_indexes_exist;
use crate::store::{MemoryStore, MongoStore, Store};
use crate::teller::TellerConfig;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    elections_dir: PathBuf,
    phase_timeout: u64,
    tellers: TellerConfig,
}

impl Config {
    /// Root directory of the per-election artifact directories.
    pub fn elections_dir(&self) -> &Path {
        &self.elections_dir
    }

    /// Longest a phase may run before its tellers are killed.
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout)
    }

    /// How teller processes are started.
    pub fn tellers(&self) -> &TellerConfig {
        &self.tellers
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!(
            "Elections directory is {}, phases time out after {}s",
            config.elections_dir.display(),
            config.phase_timeout
        );

        Ok(rocket.manage(config))
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    #[serde(default)]
    db_uri: Option<String>,
    // non-secrets
    #[serde(default = "default_db_name")]
    db_name: String,
}

fn default_db_name() -> String {
    "vmv".to_string()
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places a [`Store`] into managed state.
/// Without a `db_uri` an in-memory store is used instead.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let Some(db_uri) = config.db_uri else {
            warn!("No `db_uri` configured, elections will be kept in memory only");
            let store: Store = Arc::new(MemoryStore::new());
            return Ok(rocket.manage(store));
        };

        info!("Loaded database config, connecting...");
        let client = match MongoClient::with_uri_str(db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&config.db_name);

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        let store: Store = Arc::new(MongoStore::from_db(&db));
        Ok(rocket.manage(store))
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Config {
        /// Elections under `<dir>/elections`, fake tellers in `dir`.
        pub fn example(dir: &Path) -> Self {
            Self {
                elections_dir: dir.join("elections"),
                phase_timeout: 10,
                tellers: TellerConfig::example(dir),
            }
        }
    }
}
