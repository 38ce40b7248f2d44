//! Server configuration.
//!
//! Everything is read from `DRE_*` environment variables. Missing or malformed values are logged and replaced by
//! their defaults, so a server always starts. Credentials are wrapped in [`Secret`] and never logged.
use std::{env, time::Duration as StdDuration};

use chrono::Duration;
use deposit_common::{
    helpers::{parse_boolean_flag, parse_duration},
    Secret,
};
use deposit_engine::{lock_coordinator::LockConfig, matcher::MatchRules, SettlementConfig};
use log::*;

const DEFAULT_DRE_HOST: &str = "127.0.0.1";
const DEFAULT_DRE_PORT: u16 = 8370;
const DEFAULT_MAX_DB_CONNECTIONS: u32 = 25;
const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(30);
const DEFAULT_POLL_BATCH_SIZE: i64 = 200;
const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

const SECOND: StdDuration = StdDuration::from_secs(1);
const HOUR: StdDuration = StdDuration::from_secs(3600);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_db_connections: u32,
    /// Matching rules, lease lengths and timeouts for the settlement flow.
    pub settlement: SettlementConfig,
    pub polling: PollingConfig,
    pub casino: CasinoConfig,
    pub telegram: TelegramConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DRE_HOST.to_string(),
            port: DEFAULT_DRE_PORT,
            database_url: String::default(),
            max_db_connections: DEFAULT_MAX_DB_CONNECTIONS,
            settlement: SettlementConfig::default(),
            polling: PollingConfig::default(),
            casino: CasinoConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

/// The reconciliation worker settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollingConfig {
    pub enabled: bool,
    pub interval: StdDuration,
    /// Only payments ingested within this window are picked up.
    pub lookback: Duration,
    pub batch_size: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_POLL_INTERVAL,
            lookback: Duration::hours(8),
            batch_size: DEFAULT_POLL_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CasinoConfig {
    /// Base URL of the settlement gateway, e.g. "https://cashdesk.example.com/api"
    pub base_url: String,
    pub api_key: Secret<String>,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub api_url: String,
    pub bot_token: Secret<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self { enabled: true, api_url: DEFAULT_TELEGRAM_API_URL.to_string(), bot_token: Secret::default() }
    }
}

impl TelegramConfig {
    /// Notifications only go out when they are switched on and a bot token is available.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.bot_token.is_empty()
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("DRE_HOST").ok().unwrap_or_else(|| DEFAULT_DRE_HOST.into());
        let port = env::var("DRE_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for DRE_PORT. {e} Using the default, {DEFAULT_DRE_PORT}, instead."
                    );
                    DEFAULT_DRE_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_DRE_PORT);
        let database_url = env::var("DRE_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ DRE_DATABASE_URL is not set. Please set it to the URL for the deposit ledger.");
            String::default()
        });
        let max_db_connections = env::var("DRE_MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|s| {
                s.parse::<u32>()
                    .map_err(|e| warn!("🪛️ Invalid configuration value for DRE_MAX_DB_CONNECTIONS. {e}"))
                    .ok()
            })
            .unwrap_or(DEFAULT_MAX_DB_CONNECTIONS);
        let settlement = configure_settlement();
        let polling = configure_polling();
        let casino = CasinoConfig::from_env_or_defaults();
        let telegram = TelegramConfig::from_env_or_defaults();
        Self { host, port, database_url, max_db_connections, settlement, polling, casino, telegram }
    }
}

impl CasinoConfig {
    pub fn from_env_or_defaults() -> Self {
        let base_url = env::var("DRE_CASINO_API_URL").ok().unwrap_or_else(|| {
            error!("🪛️ DRE_CASINO_API_URL is not set. Deposits cannot be credited until it is.");
            String::default()
        });
        let api_key = env::var("DRE_CASINO_API_KEY").ok().unwrap_or_else(|| {
            error!("🪛️ DRE_CASINO_API_KEY is not set. Please set it to the API key for the casino settlement gateway.");
            String::default()
        });
        Self { base_url: base_url.trim_end_matches('/').to_string(), api_key: Secret::new(api_key) }
    }
}

impl TelegramConfig {
    pub fn from_env_or_defaults() -> Self {
        let enabled = parse_boolean_flag(env::var("DRE_NOTIFICATIONS_ENABLED").ok(), true);
        let api_url = env::var("DRE_TELEGRAM_API_URL").ok().unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.into());
        let bot_token = Secret::new(env::var("DRE_TELEGRAM_BOT_TOKEN").ok().unwrap_or_default());
        if enabled && bot_token.is_empty() {
            warn!("🪛️ DRE_TELEGRAM_BOT_TOKEN is not set. Users will not be told when their deposits land.");
        }
        if !enabled {
            info!("🪛️ User notifications are disabled.");
        }
        Self { enabled, api_url: api_url.trim_end_matches('/').to_string(), bot_token }
    }
}

fn configure_settlement() -> SettlementConfig {
    let defaults = SettlementConfig::default();
    let match_rules = MatchRules {
        search_window: env_duration("DRE_SEARCH_WINDOW_SECS", SECOND, defaults.match_rules.search_window),
        max_request_age: env_duration("DRE_MAX_REQUEST_AGE_HOURS", HOUR, defaults.match_rules.max_request_age),
        max_payment_delay: env_duration("DRE_MAX_PAYMENT_DELAY_HOURS", HOUR, defaults.match_rules.max_payment_delay),
    };
    let lock_config = LockConfig {
        payment_lease: env_duration("DRE_PAYMENT_LEASE_SECS", SECOND, defaults.lock_config.payment_lease),
        ..defaults.lock_config
    };
    let gateway_timeout = env_std_duration("DRE_GATEWAY_TIMEOUT_SECS", SECOND, defaults.gateway_timeout);
    let config = SettlementConfig { match_rules, lock_config, gateway_timeout, ..defaults };
    if !config.gateway_timeout_fits_lease() {
        warn!(
            "🪛️ DRE_GATEWAY_TIMEOUT_SECS ({}s) should be shorter than DRE_PAYMENT_LEASE_SECS ({}s).",
            config.gateway_timeout.as_secs(),
            config.lock_config.payment_lease.num_seconds()
        );
    }
    config
}

fn configure_polling() -> PollingConfig {
    let defaults = PollingConfig::default();
    let enabled = parse_boolean_flag(env::var("DRE_POLLING_ENABLED").ok(), defaults.enabled);
    let interval = env_std_duration("DRE_POLL_INTERVAL_SECS", SECOND, DEFAULT_POLL_INTERVAL);
    let lookback = env_duration("DRE_POLL_LOOKBACK_HOURS", HOUR, defaults.lookback);
    let batch_size = env::var("DRE_POLL_BATCH_SIZE")
        .ok()
        .and_then(|s| {
            s.parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .or_else(|| {
                    warn!("🪛️ Invalid configuration value for DRE_POLL_BATCH_SIZE ({s}).");
                    None
                })
        })
        .unwrap_or(defaults.batch_size);
    if !enabled {
        info!("🪛️ The reconciliation worker is disabled. Payments will only be settled when triggered.");
    }
    PollingConfig { enabled, interval: non_zero(interval, DEFAULT_POLL_INTERVAL), lookback, batch_size }
}

/// Reads a whole number of `unit`s from the environment variable `name`.
fn env_std_duration(name: &str, unit: StdDuration, default: StdDuration) -> StdDuration {
    match env::var(name) {
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {}s.", default.as_secs());
            default
        },
        Ok(s) => parse_duration(Some(s.clone()), unit).unwrap_or_else(|| {
            warn!("🪛️ Invalid configuration value for {name} ({s}). Using the default value of {}s.", default.as_secs());
            default
        }),
    }
}

fn env_duration(name: &str, unit: StdDuration, default: Duration) -> Duration {
    let fallback = default.to_std().unwrap_or(StdDuration::ZERO);
    let value = env_std_duration(name, unit, fallback);
    Duration::from_std(value).unwrap_or(default)
}

fn non_zero(value: StdDuration, default: StdDuration) -> StdDuration {
    if value.is_zero() {
        warn!("🪛️ A zero interval is not allowed. Using {}s instead.", default.as_secs());
        default
    } else {
        value
    }
}
