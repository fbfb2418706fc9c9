use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration: built-in defaults, overlaid by an optional config
/// file, overlaid by `TCGSALES_`-prefixed environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database holding the catalog and the harvested sales.
    pub database_url: String,
    pub scrape: ScrapeConfig,
}

/// Policy knobs for the scraping pipeline. The recency window and the probe
/// discriminator are observed site behavior, not a documented contract, so
/// both are configuration rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Worker slots; each drives one browser page. Keep this single-digit,
    /// the target site rate-limits aggressively.
    pub concurrency: usize,
    /// 1-based attempt ceiling per job.
    pub max_attempts: u32,
    /// Fixed wait before a failed job re-enters the queue, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Pagination stops once the oldest collected sale is older than this.
    pub recency_window_days: i64,
    /// `limit` value that marks the site's single-row probe request.
    pub probe_limit: u64,
    /// Lower bound of the randomized pause before UI interactions, in
    /// milliseconds.
    pub human_delay_min_ms: u64,
    /// Upper bound of the randomized pause before UI interactions, in
    /// milliseconds.
    pub human_delay_max_ms: u64,
    pub navigation_timeout_secs: u64,
    pub response_timeout_secs: u64,
    pub element_timeout_secs: u64,
    /// Run the browser without a visible window.
    pub headless: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tcgsales.db".into(),
            scrape: ScrapeConfig::default(),
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_attempts: 3,
            retry_backoff_ms: 3_000,
            recency_window_days: 7,
            probe_limit: 1,
            human_delay_min_ms: 300,
            human_delay_max_ms: 600,
            navigation_timeout_secs: 30,
            response_timeout_secs: 30,
            element_timeout_secs: 10,
            headless: true,
        }
    }
}

impl ScrapeConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }
}

impl Settings {
    /// Loads settings, preferring `path` when given, otherwise looking for a
    /// config file in the platform config directory.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path));
            }
            None => {
                if let Some(default_path) = default_config_file() {
                    builder = builder
                        .add_source(config::File::from(default_path).required(false));
                }
            }
        }

        builder
            .add_source(config::Environment::with_prefix("TCGSALES").separator("__"))
            .build()?
            .try_deserialize()
    }
}

fn default_config_file() -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "tcgsales")?;
    Some(dirs.config_dir().join("config.toml"))
}
