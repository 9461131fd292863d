//! # Carwings Module
//!
//! Client for the Carwings (NissanConnect EV) HTTP gateway, implementing
//! [`TelemetryAccount`] for the bridge.
//!
//! ```text
//! carwings/
//! ├── mod.rs        - Session, login and the account calls
//! ├── crypto.rs     - Blowfish password encryption
//! └── responses.rs  - Gateway response models
//! ```
//!
//! Every call is a form-encoded POST answered with JSON carrying a `status`
//! field. A session logs in on connect; the identifiers returned by the login
//! are sent along with every later call. When the gateway reports the session
//! as expired, the call logs in once more and is repeated a single time.

pub mod crypto;
pub mod responses;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::telemetry::{AccountError, BatteryStatus, DailyStatistics, TelemetryAccount};
use responses::{
    BatteryStatusResponse, DailyStatisticsResponse, Envelope, InitialAppResponse, LoginResponse,
    UpdateResponse,
};

pub const DEFAULT_BASE_URL: &str = "https://gdcportalgw.its-mo.com/api_v210707_NE/gdc/";
const INITIAL_APP_STR: &str = "9s5rfKVuMrT03RtzajWNcA";
const LANGUAGE: &str = "en-US";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Account region; selects the backend the gateway forwards to
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    /// USA
    #[default]
    Nna,
    /// Europe
    Ne,
    /// Canada
    Nci,
    /// Australia
    Nma,
    /// Japan
    Nml,
}

impl Region {
    pub fn code(&self) -> &'static str {
        match self {
            Region::Nna => "NNA",
            Region::Ne => "NE",
            Region::Nci => "NCI",
            Region::Nma => "NMA",
            Region::Nml => "NML",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct CarwingsConfig {
    pub username: String,
    pub password: String,
    pub region: Region,
    /// Gateway endpoint; the public gateway when unset
    pub base_url: Option<String>,
}

impl From<reqwest::Error> for AccountError {
    fn from(e: reqwest::Error) -> Self {
        AccountError::Request(e.to_string())
    }
}

/// Identifiers handed out by the login
#[derive(Debug, Clone, Default)]
struct Vehicle {
    vin: String,
    dcm_id: String,
    timezone: String,
    custom_session_id: String,
}

/// Logged-in gateway session
pub struct Session {
    http: reqwest::Client,
    base_url: Url,
    config: CarwingsConfig,
    vehicle: RwLock<Vehicle>,
}

impl Session {
    /// Fetches the encryption key and logs in
    pub async fn connect(config: &CarwingsConfig) -> Result<Self, AccountError> {
        let base_url = parse_base_url(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let session = Session {
            http,
            base_url,
            config: config.clone(),
            vehicle: RwLock::new(Vehicle::default()),
        };
        session.login().await?;
        Ok(session)
    }

    /// Runs the login handshake and stores the returned identifiers
    async fn login(&self) -> Result<(), AccountError> {
        let region = self.config.region.code();

        let initial: InitialAppResponse = self
            .request(
                "InitialApp_v2.php",
                &[
                    ("RegionCode", region),
                    ("lg", LANGUAGE),
                    ("initial_app_str", INITIAL_APP_STR),
                ],
            )
            .await?;

        let encrypted = crypto::encrypt_password(&self.config.password, &initial.baseprm)?;

        let login: LoginResponse = self
            .request(
                "UserLoginRequest.php",
                &[
                    ("RegionCode", region),
                    ("UserId", self.config.username.as_str()),
                    ("Password", encrypted.as_str()),
                    ("lg", LANGUAGE),
                    ("initial_app_str", INITIAL_APP_STR),
                ],
            )
            .await?;

        let vehicle = login
            .vehicle()
            .cloned()
            .ok_or_else(|| AccountError::Decode("login response lists no vehicle".to_string()))?;

        info!("Logged in to Carwings ({}), vehicle {}", region, vehicle.vin);

        *self.vehicle.write().await = Vehicle {
            vin: vehicle.vin,
            dcm_id: login.customer_info.vehicle.dcm_id,
            timezone: login.customer_info.timezone,
            custom_session_id: vehicle.custom_sessionid,
        };
        Ok(())
    }

    /// Parameters every call after login carries, followed by `extra`
    async fn session_params(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let vehicle = self.vehicle.read().await;
        let mut params = vec![
            ("RegionCode", self.config.region.code().to_string()),
            ("lg", LANGUAGE.to_string()),
            ("DCMID", vehicle.dcm_id.clone()),
            ("VIN", vehicle.vin.clone()),
            ("tz", vehicle.timezone.clone()),
            ("custom_sessionid", vehicle.custom_session_id.clone()),
            ("initial_app_str", INITIAL_APP_STR.to_string()),
        ];
        params.extend_from_slice(extra);
        params
    }

    /// Session call that logs in again once if the gateway reports the session expired
    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        extra: &[(&'static str, String)],
    ) -> Result<T, AccountError> {
        let params = self.session_params(extra).await;
        match self.request(endpoint, &params).await {
            Err(AccountError::NotLoggedIn) => {
                warn!("Carwings session expired during {}, logging in again", endpoint);
                self.login().await?;
                let params = self.session_params(extra).await;
                self.request(endpoint, &params).await
            }
            result => result,
        }
    }

    async fn request<T, P>(&self, endpoint: &str, params: &P) -> Result<T, AccountError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| AccountError::Request(format!("invalid endpoint {}: {}", endpoint, e)))?;

        debug!("POST {}", endpoint);
        let body = self
            .http
            .post(url)
            .form(params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        decode_response(&body)
    }
}

/// Checks the status envelope, then decodes the payload
fn decode_response<T: DeserializeOwned>(body: &str) -> Result<T, AccountError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| AccountError::Decode(e.to_string()))?;

    match envelope.status {
        200 => serde_json::from_str(body).map_err(|e| AccountError::Decode(e.to_string())),
        401 => Err(AccountError::NotLoggedIn),
        status => Err(AccountError::Api {
            status,
            message: envelope.describe(),
        }),
    }
}

fn parse_base_url(raw: &str) -> Result<Url, AccountError> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(|e| AccountError::Request(format!("invalid base url {}: {}", raw, e)))
}

#[async_trait]
impl TelemetryAccount for Session {
    async fn update_status(&self) -> Result<String, AccountError> {
        let response: UpdateResponse = self.call("BatteryStatusCheckRequest.php", &[]).await?;
        debug!("Battery update requested, key {}", response.result_key);
        Ok(response.result_key)
    }

    async fn battery_status(&self) -> Result<BatteryStatus, AccountError> {
        let response: BatteryStatusResponse =
            self.call("BatteryStatusRecordsRequest.php", &[]).await?;
        Ok(response.records.into_status())
    }

    async fn daily_statistics(&self, date: NaiveDate) -> Result<DailyStatistics, AccountError> {
        let target = date.format("%Y-%m-%d").to_string();
        let response: DailyStatisticsResponse = self
            .call(
                "DriveAnalysisBasicScreenRequestEx.php",
                &[("DetailTargetDate", target)],
            )
            .await?;
        Ok(response.personal_data.into_statistics(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::units::{format_distance, UnitSystem};
    use crate::telemetry::{ChargingStatus, PluginState};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "88dSp7wWnV3bvv9Z88zEwg";

    async fn gateway() -> MockServer {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/gdc/InitialApp_v2.php"))
            .and(body_string_contains("RegionCode=NE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "message": "success",
                "baseprm": KEY
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/gdc/UserLoginRequest.php"))
            .and(body_string_contains("UserId=leaf%40example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "VehicleInfoList": {
                    "vehicleInfo": [ { "vin": "SJNFAAZE0U6000001", "custom_sessionid": "abc123" } ]
                },
                "CustomerInfo": {
                    "Timezone": "Europe/Berlin",
                    "VehicleInfo": { "DCMID": "201212345678" }
                }
            })))
            .mount(&server)
            .await;

        server
    }

    fn config(server: &MockServer) -> CarwingsConfig {
        CarwingsConfig {
            username: "leaf@example.com".to_string(),
            password: "secret".to_string(),
            region: Region::Ne,
            base_url: Some(format!("{}/gdc", server.uri())),
        }
    }

    #[tokio::test]
    async fn login_stores_vehicle_identifiers() {
        let server = gateway().await;
        let session = Session::connect(&config(&server)).await.expect("login");

        let vehicle = session.vehicle.read().await;
        assert_eq!(vehicle.vin, "SJNFAAZE0U6000001");
        assert_eq!(vehicle.dcm_id, "201212345678");
        assert_eq!(vehicle.timezone, "Europe/Berlin");
        assert_eq!(vehicle.custom_session_id, "abc123");
    }

    #[tokio::test]
    async fn login_sends_encrypted_password() {
        let server = gateway().await;
        Session::connect(&config(&server)).await.expect("login");

        let encrypted = crypto::encrypt_password("secret", KEY).expect("encrypt");
        let requests = server.received_requests().await.expect("recorded");
        let login = requests
            .iter()
            .find(|r| r.url.path().ends_with("UserLoginRequest.php"))
            .expect("login request");
        let form: Vec<(String, String)> = url::form_urlencoded::parse(&login.body)
            .into_owned()
            .collect();

        assert!(form.contains(&("Password".to_string(), encrypted)));
        assert!(!form.iter().any(|(_, v)| v == "secret"));
    }

    #[tokio::test]
    async fn battery_calls_carry_session_parameters() {
        let server = gateway().await;

        Mock::given(method("POST"))
            .and(path("/gdc/BatteryStatusCheckRequest.php"))
            .and(body_string_contains("custom_sessionid=abc123"))
            .and(body_string_contains("VIN=SJNFAAZE0U6000001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "resultKey": "key-42"
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/gdc/BatteryStatusRecordsRequest.php"))
            .and(body_string_contains("DCMID=201212345678"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "BatteryStatusRecords": {
                    "BatteryStatus": {
                        "BatteryChargingStatus": "NOT_CHARGING",
                        "BatteryCapacity": "240",
                        "BatteryRemainingAmount": "180",
                        "BatteryRemainingAmountWH": "",
                        "SOC": { "Value": "75" }
                    },
                    "PluginState": "QC_CONNECTED",
                    "CruisingRangeAcOn": "160934",
                    "CruisingRangeAcOff": "170000",
                    "TimeRequiredToFull200": { "HourRequiredToFull": "2", "MinutesRequiredToFull": "15" },
                    "NotificationDateAndTime": "2023/03/05 14:07"
                }
            })))
            .mount(&server)
            .await;

        let session = Session::connect(&config(&server)).await.expect("login");

        assert_eq!(session.update_status().await.expect("update"), "key-42");

        let status = session.battery_status().await.expect("status");
        assert_eq!(status.state_of_charge, 75);
        assert_eq!(status.capacity, 240);
        assert_eq!(
            format_distance(UnitSystem::Miles, status.cruising_range_ac_on),
            "100 mi"
        );
        assert_eq!(
            format_distance(UnitSystem::Kilometers, status.cruising_range_ac_off),
            "170.0 km"
        );
        assert_eq!(status.plugin_state, PluginState::QuickChargerConnected);
        assert_eq!(status.charging_status, ChargingStatus::NotCharging);
        assert_eq!(status.time_to_full.level2, Duration::from_secs(2 * 3600 + 15 * 60));
        assert_eq!(status.time_to_full.level1, Duration::ZERO);
    }

    #[tokio::test]
    async fn daily_statistics_request_the_given_date() {
        let server = gateway().await;

        Mock::given(method("POST"))
            .and(path("/gdc/DriveAnalysisBasicScreenRequestEx.php"))
            .and(body_string_contains("DetailTargetDate=2023-03-05"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "DriveAnalysisBasicScreenResponsePersonalData": {
                    "DateSummary": {
                        "TargetDate": "2023-03-05",
                        "ElectricMileage": "6.2",
                        "ElectricMileageLevel": "4",
                        "PowerConsumptMoter": "120.5",
                        "PowerConsumptMoterLevel": "3",
                        "PowerConsumptMinus": "30.25",
                        "PowerConsumptMinusLevel": "2",
                        "PowerConsumptAUX": "8",
                        "PowerConsumptAUXLevel": "1"
                    },
                    "ElectricCostScale": "kWh/100km"
                }
            })))
            .mount(&server)
            .await;

        let session = Session::connect(&config(&server)).await.expect("login");
        let date = NaiveDate::from_ymd_opt(2023, 3, 5).expect("date");
        let stats = session.daily_statistics(date).await.expect("daily");

        assert_eq!(stats.target_date, date);
        assert_eq!(stats.efficiency, 6.2);
        assert_eq!(stats.efficiency_scale, "kWh/100km");
        assert_eq!(stats.power_regeneration, 30.25);
        assert_eq!(stats.power_consumed_aux_level, 1);
    }

    #[tokio::test]
    async fn expired_session_reports_not_logged_in() {
        let server = gateway().await;

        Mock::given(method("POST"))
            .and(path("/gdc/BatteryStatusRecordsRequest.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": 401 })))
            .mount(&server)
            .await;

        let session = Session::connect(&config(&server)).await.expect("login");
        assert!(matches!(
            session.battery_status().await,
            Err(AccountError::NotLoggedIn)
        ));
        // one login on connect, one retry
        assert_eq!(login_count(&server).await, 2);
    }

    async fn login_count(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .expect("recorded")
            .iter()
            .filter(|r| r.url.path().ends_with("UserLoginRequest.php"))
            .count()
    }

    #[tokio::test]
    async fn expired_session_logs_in_again_and_repeats_the_call() {
        let server = gateway().await;

        Mock::given(method("POST"))
            .and(path("/gdc/BatteryStatusRecordsRequest.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": 401 })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gdc/BatteryStatusRecordsRequest.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "BatteryStatusRecords": {
                    "BatteryStatus": {
                        "BatteryChargingStatus": "NORMAL_CHARGING",
                        "SOC": { "Value": "42" }
                    },
                    "PluginState": "CONNECTED"
                }
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let session = Session::connect(&config(&server)).await.expect("login");
        let status = session.battery_status().await.expect("status after re-login");

        assert_eq!(status.state_of_charge, 42);
        assert_eq!(status.plugin_state, PluginState::Connected);
        assert_eq!(login_count(&server).await, 2);
    }

    #[tokio::test]
    async fn gateway_errors_carry_status_and_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/gdc/InitialApp_v2.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 404,
                "ErrorMessage": "INVALID PARAMS"
            })))
            .mount(&server)
            .await;

        let result = Session::connect(&config(&server)).await;
        match result {
            Err(AccountError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "INVALID PARAMS");
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn login_without_vehicle_fails() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/gdc/InitialApp_v2.php"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "status": 200, "baseprm": KEY })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gdc/UserLoginRequest.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": 200 })))
            .mount(&server)
            .await;

        assert!(matches!(
            Session::connect(&config(&server)).await,
            Err(AccountError::Decode(_))
        ));
    }

    #[test]
    fn region_codes_round_trip_through_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            region: Region,
        }
        let parsed: Wrapper = toml::from_str("region = \"NMA\"").expect("parse");
        assert_eq!(parsed.region, Region::Nma);
        assert_eq!(parsed.region.code(), "NMA");
        assert!(toml::from_str::<Wrapper>("region = \"XX\"").is_err());
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = parse_base_url("http://localhost:8080/gdc").expect("url");
        assert_eq!(
            url.join("InitialApp_v2.php").expect("join").as_str(),
            "http://localhost:8080/gdc/InitialApp_v2.php"
        );
    }
}
