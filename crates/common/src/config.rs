use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::errors::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
    #[serde(default)]
    pub announcer: AnnouncerConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_path(".")
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config::builder()
            .add_source(
                File::with_name(
                    path.as_ref()
                        .join("config/default")
                        .to_string_lossy()
                        .as_ref(),
                )
                .required(false),
            )
            .add_source(
                File::with_name(
                    path.as_ref()
                        .join("config/local")
                        .to_string_lossy()
                        .as_ref(),
                )
                .required(false),
            )
            .add_source(Environment::default().separator("__"))
            .build()?
            .try_deserialize()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default)]
    pub test_admin_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardConfig {
    /// Users below this many qualified days in a month are left off the
    /// monthly leaderboard.
    #[serde(default = "LeaderboardConfig::default_min_contributions")]
    pub min_contributions: i64,
}

impl LeaderboardConfig {
    const fn default_min_contributions() -> i64 {
        10
    }
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            min_contributions: Self::default_min_contributions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnouncerConfig {
    #[serde(default = "AnnouncerConfig::default_tick_secs")]
    pub tick_secs: u64,
}

impl AnnouncerConfig {
    const fn default_tick_secs() -> u64 {
        60
    }
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            tick_secs: Self::default_tick_secs(),
        }
    }
}
