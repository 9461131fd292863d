//! Snapshot decomposition
//!
//! Flattens a [`BatteryStatus`] or [`DailyStatistics`] into the ordered list of
//! readings published under `{prefix}/battery/...` and `{prefix}/daily/...`.
//! The field order is fixed so a broker log always reads the same way.

use super::units::{format_distance, format_duration, UnitSystem};
use super::{BatteryStatus, DailyStatistics};
use chrono::NaiveDateTime;

/// Category of all battery readings
pub const BATTERY_CATEGORY: &str = "battery";

/// Category of all daily statistics readings
pub const DAILY_CATEGORY: &str = "daily";

/// Literal shape downstream date/time parsers expect
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One decomposed value, relative to its category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub field: &'static str,
    pub value: String,
    pub retained: bool,
}

impl Reading {
    fn retained(field: &'static str, value: String) -> Self {
        Reading {
            field,
            value,
            retained: true,
        }
    }

    fn transient(field: &'static str, value: String) -> Self {
        Reading {
            field,
            value,
            retained: false,
        }
    }
}

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Battery readings, all retained so new subscribers get the last state
pub fn battery_readings(status: &BatteryStatus, units: UnitSystem) -> Vec<Reading> {
    vec![
        Reading::retained("timestamp", format_timestamp(&status.timestamp)),
        Reading::retained("stateofcharge", status.state_of_charge.to_string()),
        Reading::retained("remaining", status.remaining.to_string()),
        Reading::retained("capacity", status.capacity.to_string()),
        Reading::retained(
            "cruisingrangeacoff",
            format_distance(units, status.cruising_range_ac_off),
        ),
        Reading::retained(
            "cruisingrangeacon",
            format_distance(units, status.cruising_range_ac_on),
        ),
        Reading::retained("remainingwh", status.remaining_wh.clone()),
        Reading::retained("pluginstate", status.plugin_state.to_string()),
        Reading::retained("chargingstatus", status.charging_status.to_string()),
        Reading::retained(
            "timetofull/level1",
            format_duration(status.time_to_full.level1),
        ),
        Reading::retained(
            "timetofull/level2",
            format_duration(status.time_to_full.level2),
        ),
        Reading::retained(
            "timetofull/level2at6kw",
            format_duration(status.time_to_full.level2_at_6kw),
        ),
    ]
}

/// Daily readings, never retained
pub fn daily_readings(stats: &DailyStatistics) -> Vec<Reading> {
    let date = stats.target_date.and_hms_opt(0, 0, 0).unwrap_or_default();

    vec![
        Reading::transient("date", format_timestamp(&date)),
        Reading::transient("efficiency", format!("{:.2}", stats.efficiency)),
        Reading::transient("efficiencylevel", stats.efficiency_level.to_string()),
        Reading::transient("efficiencyscale", stats.efficiency_scale.clone()),
        Reading::transient(
            "powerconsumedmotorlevel",
            stats.power_consumed_motor_level.to_string(),
        ),
        Reading::transient(
            "powerconsumedauxlevel",
            stats.power_consumed_aux_level.to_string(),
        ),
        Reading::transient(
            "powerregenerationlevel",
            stats.power_regeneration_level.to_string(),
        ),
        Reading::transient(
            "powerconsumedmotor",
            format!("{:.2}", stats.power_consumed_motor),
        ),
        Reading::transient("powerconsumedaux", format!("{:.2}", stats.power_consumed_aux)),
        Reading::transient(
            "powerregeneration",
            format!("{:.2}", stats.power_regeneration),
        ),
    ]
}
