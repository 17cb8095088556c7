use admit_core::TicketingRules;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Rate limiting is skipped when absent.
    pub redis: Option<RedisConfig>,
    /// Notifications go to the log when absent.
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ticketing: TicketingRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_rate_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_notification_topic")]
    pub notification_topic: String,
}

fn default_notification_topic() -> String {
    "admit.notifications".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub secret_key: String,
    pub callback_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `ADMIT_GATEWAY__SECRET_KEY=sk_live_...`
            .add_source(config::Environment::with_prefix("ADMIT").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Ticketing rules with the gateway section folded in.
    pub fn ticketing_rules(&self) -> TicketingRules {
        let mut rules = self.ticketing.clone();
        if let Some(url) = &self.gateway.callback_url {
            rules.default_callback_url = Some(url.clone());
        }
        if let Some(timeout_ms) = self.gateway.timeout_ms {
            rules.gateway_timeout_ms = timeout_ms;
        }
        rules
    }
}
