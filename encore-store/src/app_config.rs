use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub checkout: CheckoutConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Server-held secret. Missing is allowed at start-up; every gateway call
    /// then answers with a configuration error instead.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl GatewayConfig {
    /// The credential, treating a blank value as absent.
    pub fn credential(&self) -> Option<String> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckoutConfig {
    /// Where the browser-side code reaches our proxy.
    pub proxy_url: String,
    /// Publishable gateway key, safe to ship to clients.
    pub public_key: String,
    #[serde(default = "default_poll_interval")]
    pub pix_poll_interval_seconds: u64,
    #[serde(default = "default_pix_timeout")]
    pub pix_timeout_seconds: u64,
    #[serde(default)]
    pub detect_debit_bins: bool,
    /// Base of the hosted checkout return pages.
    #[serde(default = "default_storefront")]
    pub storefront_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

fn default_timeout() -> u64 { 30 }
fn default_poll_interval() -> u64 { 3 }
fn default_pix_timeout() -> u64 { 600 }
fn default_storefront() -> String { "http://localhost:3000".into() }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer-local overrides, never committed
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `ENCORE__GATEWAY__ACCESS_TOKEN=...` sets `gateway.access_token`
            .add_source(config::Environment::with_prefix("ENCORE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
