// src/bin/find_rate.rs

use std::{env, fs};

use reqwest::Url;
use serde::Deserialize;
use throttle_optimizer::{
    Error as CrateError,
    search::{RateSearchSettings, RateSearcher},
    throttle::reqwest_integration::ReqwestService,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// --- Configuration ---
const CONFIG_PATH_ENV_VAR: &str = "FIND_RATE_CONFIG";
const URLS_ENV_VAR: &str = "FIND_RATE_URLS";
const DEFAULT_FILTER: &str = "info";

/// Contents of the JSON file named by `FIND_RATE_CONFIG`. Search settings sit
/// next to `urls` and fall back to their defaults when omitted.
#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    urls: Vec<String>,
    #[serde(flatten)]
    settings: RateSearchSettings,
}

fn load_config() -> Result<Config, CrateError> {
    let mut config = match env::var(CONFIG_PATH_ENV_VAR) {
        Ok(path) => {
            let raw = fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read config file {path}: {e}"))?;
            serde_json::from_str::<Config>(&raw)
                .map_err(|e| format!("Invalid config file {path}: {e}"))?
        }
        Err(_) => Config {
            urls: Vec::new(),
            settings: RateSearchSettings::default(),
        },
    };

    if let Ok(urls) = env::var(URLS_ENV_VAR) {
        if !config.urls.is_empty() {
            warn!("{URLS_ENV_VAR} overrides the urls listed in the config file");
        }
        config.urls = urls
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(String::from)
            .collect();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), CrateError> {
    dotenvy::dotenv().ok();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()?;

    let config = load_config()?;
    if config.urls.is_empty() {
        return Err(format!(
            "No target URLs configured; set {URLS_ENV_VAR} or list `urls` in the file named by {CONFIG_PATH_ENV_VAR}"
        )
        .into());
    }
    let urls = config
        .urls
        .iter()
        .map(|url| Url::parse(url).map_err(|e| format!("Invalid URL {url:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    let timeout = config.settings.request_timeout();
    let url_count = urls.len();
    let mut searcher = RateSearcher::new(urls, config.settings, move || {
        ReqwestService::with_timeout(timeout)
    })?;

    let settings = searcher.settings();
    info!(
        target: "config",
        urls = url_count,
        min_rate = settings.min_rate(),
        max_rate = settings.max_rate(),
        concurrency = settings.concurrency(),
        max_iterations = settings.max_iterations(),
        ?timeout,
        "Starting rate search"
    );
    let outcome = searcher.find_rate().await?;

    match outcome.best_rate() {
        Some(rate) => info!(best_rate = rate, "Found optimal rate"),
        None => warn!("No candidate rate met the acceptance conditions"),
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
