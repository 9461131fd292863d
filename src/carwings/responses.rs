//! Gateway response models
//!
//! The gateway encodes almost every number as a string and leaves fields empty
//! or absent when the vehicle has no data, so numeric fields go through the
//! lenient deserializers below and everything defaults.

use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::time::Duration;

use crate::telemetry::{
    BatteryStatus, ChargingStatus, DailyStatistics, PluginState, TimeToFull,
};

const METERS_PER_MILE: f64 = 1609.344;
const NOTIFICATION_FORMAT: &str = "%Y/%m/%d %H:%M";

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(f64),
    Text(String),
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Option::<Lenient>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(Lenient::Number(n)) => Ok(n),
        Some(Lenient::Text(s)) if s.trim().is_empty() => Ok(0.0),
        Some(Lenient::Text(s)) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn lenient_i32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    lenient_f64(deserializer).map(|n| n.round() as i32)
}

/// Fields every response carries
#[derive(Deserialize, Debug, Default)]
pub struct Envelope {
    #[serde(default, deserialize_with = "lenient_i32")]
    pub status: i32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "ErrorMessage")]
    pub error_message: Option<String>,
}

impl Envelope {
    pub fn describe(&self) -> String {
        self.error_message
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "no message".to_string())
    }
}

#[derive(Deserialize, Debug)]
pub struct InitialAppResponse {
    pub baseprm: String,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct VehicleInfo {
    #[serde(default)]
    pub vin: String,
    #[serde(default)]
    pub custom_sessionid: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct VehicleInfoList {
    #[serde(default, rename = "vehicleInfo")]
    pub vehicle_info: Vec<VehicleInfo>,
}

#[derive(Deserialize, Debug, Default)]
pub struct CustomerVehicle {
    #[serde(default, rename = "DCMID")]
    pub dcm_id: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct CustomerInfo {
    #[serde(default, rename = "Timezone")]
    pub timezone: String,
    #[serde(default, rename = "VehicleInfo")]
    pub vehicle: CustomerVehicle,
}

#[derive(Deserialize, Debug, Default)]
pub struct LoginResponse {
    #[serde(default, rename = "VehicleInfoList")]
    pub vehicle_info_list: VehicleInfoList,
    #[serde(default, rename = "vehicleInfo")]
    pub vehicle_info: Vec<VehicleInfo>,
    #[serde(default, rename = "CustomerInfo")]
    pub customer_info: CustomerInfo,
}

impl LoginResponse {
    /// First vehicle of the account; newer and older gateways put it in different places
    pub fn vehicle(&self) -> Option<&VehicleInfo> {
        self.vehicle_info_list
            .vehicle_info
            .first()
            .or_else(|| self.vehicle_info.first())
    }
}

#[derive(Deserialize, Debug)]
pub struct UpdateResponse {
    #[serde(rename = "resultKey")]
    pub result_key: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct Soc {
    #[serde(default, rename = "Value", deserialize_with = "lenient_i32")]
    pub value: i32,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
pub struct BatteryRecord {
    #[serde(default)]
    pub battery_charging_status: String,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub battery_capacity: i32,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub battery_remaining_amount: i32,
    #[serde(default, rename = "BatteryRemainingAmountWH")]
    pub battery_remaining_amount_wh: String,
    #[serde(default, rename = "SOC")]
    pub soc: Soc,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RequiredToFull {
    #[serde(default, deserialize_with = "lenient_i32")]
    pub hour_required_to_full: i32,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub minutes_required_to_full: i32,
}

impl RequiredToFull {
    fn duration(&self) -> Duration {
        let minutes = self.hour_required_to_full.max(0) as u64 * 60
            + self.minutes_required_to_full.max(0) as u64;
        Duration::from_secs(minutes * 60)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
pub struct BatteryStatusRecords {
    #[serde(default)]
    pub battery_status: BatteryRecord,
    #[serde(default)]
    pub plugin_state: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cruising_range_ac_on: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cruising_range_ac_off: f64,
    #[serde(default)]
    pub time_required_to_full: RequiredToFull,
    #[serde(default, rename = "TimeRequiredToFull200")]
    pub time_required_to_full_200: RequiredToFull,
    #[serde(default, rename = "TimeRequiredToFull200_6kW")]
    pub time_required_to_full_200_6kw: RequiredToFull,
    #[serde(default)]
    pub notification_date_and_time: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct BatteryStatusResponse {
    #[serde(default, rename = "BatteryStatusRecords")]
    pub records: BatteryStatusRecords,
}

impl BatteryStatusRecords {
    pub fn into_status(self) -> BatteryStatus {
        let battery = &self.battery_status;
        let state_of_charge = if battery.soc.value > 0 || battery.battery_capacity <= 0 {
            battery.soc.value
        } else {
            (battery.battery_remaining_amount as f64 * 100.0 / battery.battery_capacity as f64)
                .round() as i32
        };

        BatteryStatus {
            timestamp: parse_notification_time(&self.notification_date_and_time),
            state_of_charge,
            remaining: battery.battery_remaining_amount,
            capacity: battery.battery_capacity,
            cruising_range_ac_off: meters_to_miles(self.cruising_range_ac_off),
            cruising_range_ac_on: meters_to_miles(self.cruising_range_ac_on),
            remaining_wh: battery.battery_remaining_amount_wh.clone(),
            plugin_state: PluginState::from_code(&self.plugin_state),
            charging_status: ChargingStatus::from_code(&battery.battery_charging_status),
            time_to_full: TimeToFull {
                level1: self.time_required_to_full.duration(),
                level2: self.time_required_to_full_200.duration(),
                level2_at_6kw: self.time_required_to_full_200_6kw.duration(),
            },
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DateSummary {
    #[serde(default)]
    pub target_date: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub electric_mileage: f64,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub electric_mileage_level: i32,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub power_consumpt_moter: f64,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub power_consumpt_moter_level: i32,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub power_consumpt_minus: f64,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub power_consumpt_minus_level: i32,
    #[serde(default, rename = "PowerConsumptAUX", deserialize_with = "lenient_f64")]
    pub power_consumpt_aux: f64,
    #[serde(default, rename = "PowerConsumptAUXLevel", deserialize_with = "lenient_i32")]
    pub power_consumpt_aux_level: i32,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
pub struct PersonalData {
    #[serde(default)]
    pub date_summary: DateSummary,
    #[serde(default)]
    pub electric_cost_scale: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct DailyStatisticsResponse {
    #[serde(default, rename = "DriveAnalysisBasicScreenResponsePersonalData")]
    pub personal_data: PersonalData,
}

impl PersonalData {
    /// Summary for `requested`; the gateway omits the date when it has no data
    pub fn into_statistics(self, requested: NaiveDate) -> DailyStatistics {
        let summary = self.date_summary;
        let target_date =
            NaiveDate::parse_from_str(summary.target_date.trim(), "%Y-%m-%d").unwrap_or(requested);

        DailyStatistics {
            target_date,
            efficiency: summary.electric_mileage,
            efficiency_level: summary.electric_mileage_level,
            efficiency_scale: self.electric_cost_scale,
            power_consumed_motor: summary.power_consumpt_moter,
            power_consumed_motor_level: summary.power_consumpt_moter_level,
            power_consumed_aux: summary.power_consumpt_aux,
            power_consumed_aux_level: summary.power_consumpt_aux_level,
            power_regeneration: summary.power_consumpt_minus,
            power_regeneration_level: summary.power_consumpt_minus_level,
        }
    }
}

fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

/// Notification times are UTC; the bridge publishes local wall-clock time
pub fn parse_notification_time(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw.trim(), NOTIFICATION_FORMAT)
        .map(|utc| Utc.from_utc_datetime(&utc).with_timezone(&Local).naive_local())
        .unwrap_or_default()
}
