//! # Telemetry Module
//!
//! Vehicle telemetry as the bridge sees it: the snapshot types returned by the
//! remote account, the [`TelemetryAccount`] seam the bridge calls through, and
//! the pure formatting layer that turns a snapshot into bus values.
//!
//! ```text
//! telemetry/
//! ├── mod.rs        - Snapshot types and the account trait
//! ├── units.rs      - Distance and duration rendering
//! └── decompose.rs  - Snapshot → ordered (field, value, retained) readings
//! ```
//!
//! Snapshots are produced fresh by every fetch and never mutated afterwards.
//! Their `Default` value is the zero snapshot the bridge publishes when a
//! remote call fails.

pub mod decompose;
pub mod units;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a remote telemetry account
#[derive(Debug, Error)]
pub enum AccountError {
    /// The HTTP round trip itself failed
    #[error("Request failed: {0}")]
    Request(String),

    /// The gateway answered with a non-success status
    #[error("Gateway returned status {status}: {message}")]
    Api { status: i32, message: String },

    /// The session is not (or no longer) authenticated
    #[error("Not logged in")]
    NotLoggedIn,

    /// The response body did not have the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Password encryption during login failed
    #[error("Encryption failed: {0}")]
    Encryption(String),
}

/// Remote vehicle account the bridge fetches telemetry from
///
/// Implementations must be safe to call from several command executions at
/// once; the bridge neither serializes nor retries calls.
#[async_trait]
pub trait TelemetryAccount: Send + Sync {
    /// Asks the vehicle to refresh its battery state, returning the request key
    async fn update_status(&self) -> Result<String, AccountError>;

    /// Fetches the most recent battery status record
    async fn battery_status(&self) -> Result<BatteryStatus, AccountError>;

    /// Fetches the drive-analysis summary for one calendar day
    async fn daily_statistics(&self, date: NaiveDate) -> Result<DailyStatistics, AccountError>;
}

/// Plug state as reported by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PluginState {
    NotConnected,
    Connected,
    QuickChargerConnected,
    /// Unknown or missing code
    #[default]
    Invalid,
}

impl PluginState {
    pub fn from_code(code: &str) -> Self {
        match code {
            "NOT_CONNECTED" => PluginState::NotConnected,
            "CONNECTED" => PluginState::Connected,
            "QC_CONNECTED" => PluginState::QuickChargerConnected,
            _ => PluginState::Invalid,
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            PluginState::NotConnected => "not connected",
            PluginState::Connected => "connected",
            PluginState::QuickChargerConnected => "connected to quick charger",
            PluginState::Invalid => "invalid",
        };
        f.write_str(label)
    }
}

/// Charging state as reported by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargingStatus {
    NotCharging,
    NormalCharging,
    RapidlyCharging,
    #[default]
    Invalid,
}

impl ChargingStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            "NOT_CHARGING" => ChargingStatus::NotCharging,
            "NORMAL_CHARGING" | "CHARGING" => ChargingStatus::NormalCharging,
            "RAPIDLY_CHARGING" => ChargingStatus::RapidlyCharging,
            _ => ChargingStatus::Invalid,
        }
    }
}

impl fmt::Display for ChargingStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            ChargingStatus::NotCharging => "not charging",
            ChargingStatus::NormalCharging => "charging",
            ChargingStatus::RapidlyCharging => "rapidly charging",
            ChargingStatus::Invalid => "invalid",
        };
        f.write_str(label)
    }
}

/// Estimated time until the battery is full, per charger type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeToFull {
    /// 120V trickle charger
    pub level1: Duration,
    /// 240V charger
    pub level2: Duration,
    /// 240V charger at 6kW
    pub level2_at_6kw: Duration,
}

/// Battery status snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatteryStatus {
    /// When the vehicle produced this record, local wall-clock time
    pub timestamp: NaiveDateTime,
    /// Charge in percent
    pub state_of_charge: i32,
    /// Remaining charge in bars
    pub remaining: i32,
    /// Total capacity in bars
    pub capacity: i32,
    /// Remaining range with climate control off, miles (unrounded)
    pub cruising_range_ac_off: f64,
    /// Remaining range with climate control on, miles (unrounded)
    pub cruising_range_ac_on: f64,
    /// Remaining energy in Wh exactly as reported (may be empty)
    pub remaining_wh: String,
    pub plugin_state: PluginState,
    pub charging_status: ChargingStatus,
    pub time_to_full: TimeToFull,
}

/// Daily drive-analysis snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DailyStatistics {
    pub target_date: NaiveDate,
    /// Distance per energy unit, see `efficiency_scale`
    pub efficiency: f64,
    pub efficiency_level: i32,
    /// Unit label of `efficiency`, e.g. `miles/kWh`
    pub efficiency_scale: String,
    pub power_consumed_motor: f64,
    pub power_consumed_motor_level: i32,
    pub power_consumed_aux: f64,
    pub power_consumed_aux_level: i32,
    pub power_regeneration: f64,
    pub power_regeneration_level: i32,
}
