use serde::Deserialize;

/// Ticketing business rules, loaded from the `ticketing` config section.
#[derive(Debug, Deserialize, Clone)]
pub struct TicketingRules {
    /// Pending reservations younger than this still hold capacity.
    #[serde(default = "default_pending_freshness_minutes")]
    pub pending_freshness_minutes: i64,
    /// Pending reservations older than this are expired by the sweeper.
    #[serde(default = "default_reservation_expiry_minutes")]
    pub reservation_expiry_minutes: i64,
    #[serde(default = "default_max_quantity_per_order")]
    pub max_quantity_per_order: i32,
    #[serde(default = "default_code_prefix")]
    pub code_prefix: String,
    #[serde(default = "default_code_max_attempts")]
    pub code_max_attempts: u32,
    #[serde(default = "default_check_in_hours")]
    pub check_in_opens_hours_before: i64,
    #[serde(default = "default_check_in_hours")]
    pub check_in_closes_hours_after: i64,
    /// Issue tickets as paid without a gateway round trip (staging, comps).
    #[serde(default)]
    pub payment_bypass: bool,
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,
    pub default_callback_url: Option<String>,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: i64,
}

fn default_pending_freshness_minutes() -> i64 { 30 }
fn default_reservation_expiry_minutes() -> i64 { 24 * 60 }
fn default_max_quantity_per_order() -> i32 { 10 }
fn default_code_prefix() -> String { "ADM".to_string() }
fn default_code_max_attempts() -> u32 { 6 }
fn default_check_in_hours() -> i64 { 6 }
fn default_gateway_timeout_ms() -> u64 { 10_000 }
fn default_sweep_interval_seconds() -> u64 { 60 }
fn default_sweep_batch_size() -> i64 { 200 }

impl Default for TicketingRules {
    fn default() -> Self {
        Self {
            pending_freshness_minutes: default_pending_freshness_minutes(),
            reservation_expiry_minutes: default_reservation_expiry_minutes(),
            max_quantity_per_order: default_max_quantity_per_order(),
            code_prefix: default_code_prefix(),
            code_max_attempts: default_code_max_attempts(),
            check_in_opens_hours_before: default_check_in_hours(),
            check_in_closes_hours_after: default_check_in_hours(),
            payment_bypass: false,
            gateway_timeout_ms: default_gateway_timeout_ms(),
            default_callback_url: None,
            sweep_interval_seconds: default_sweep_interval_seconds(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}
