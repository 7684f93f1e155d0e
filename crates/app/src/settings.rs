//! Application settings.
//!
//! Read from an optional `settings.toml` in the working directory, then
//! overridden by `WAFFLE__<SECTION>__<KEY>` environment variables.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const SETTINGS_FILE: &str = "settings";
const ENV_PREFIX: &str = "WAFFLE";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `database = "memory"` or `database = { sqlite = "waffle.db" }`.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    #[default]
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: Option<String>,
    pub port: u16,
    pub database: Database,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind: None,
            port: 8000,
            database: Database::Memory,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Session {
    pub cookie_name: String,
    pub max_age_secs: i64,
    pub secure: bool,
}

impl Default for Session {
    fn default() -> Self {
        let defaults = server::SessionConfig::default();
        Self {
            cookie_name: defaults.cookie_name,
            max_age_secs: defaults.max_age_secs,
            secure: defaults.secure,
        }
    }
}

impl From<Session> for server::SessionConfig {
    fn from(value: Session) -> Self {
        Self {
            cookie_name: value.cookie_name,
            max_age_secs: value.max_age_secs,
            secure: value.secure,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub server: Server,
    pub session: Session,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(SETTINGS_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
