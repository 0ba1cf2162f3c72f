//! Wire types for the device's JSON command protocol: one HTTP endpoint
//! accepting an array of `{cmd, action, param}` objects and answering with
//! an array of `{cmd, code, value|error}` objects.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest {
    pub cmd: String,
    pub action: u32,
    pub param: Value,
}

impl CommandRequest {
    pub fn new(cmd: &str, param: Value) -> Self {
        Self {
            cmd: cmd.to_string(),
            action: 0,
            param,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandResponse {
    #[allow(dead_code)]
    pub cmd: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub error: Option<CommandFault>,
}

#[derive(Debug, Deserialize)]
pub struct CommandFault {
    #[serde(rename = "rspCode", default)]
    pub rsp_code: i64,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginValue {
    #[serde(rename = "Token")]
    pub token: TokenValue,
}

#[derive(Debug, Deserialize)]
pub struct TokenValue {
    pub name: String,
    /// Lease duration in seconds.
    #[serde(rename = "leaseTime", default)]
    pub lease_time: i64,
}

/// Structured local date-time fields as the device exchanges them. No
/// timezone shift is applied beyond what the fields already express.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeviceTime {
    pub year: i32,
    pub mon: u32,
    pub day: u32,
    pub hour: u32,
    pub min: u32,
    pub sec: u32,
}

impl DeviceTime {
    pub fn from_epoch_ms(ms: i64) -> Option<Self> {
        let local = DateTime::from_timestamp_millis(ms)?.with_timezone(&Local);
        Some(Self {
            year: local.year(),
            mon: local.month(),
            day: local.day(),
            hour: local.hour(),
            min: local.minute(),
            sec: local.second(),
        })
    }

    pub fn to_epoch_ms(self) -> Option<i64> {
        let naive = chrono::NaiveDate::from_ymd_opt(self.year, self.mon, self.day)?
            .and_hms_opt(self.hour, self.min, self.sec)?;
        Some(
            Local
                .from_local_datetime(&naive)
                .earliest()?
                .timestamp_millis(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchValue {
    #[serde(rename = "SearchResult")]
    pub result: SearchResult,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "File", default)]
    pub files: Vec<SearchHit>,
}

/// One raw recording hit as returned by a `Search` command.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    /// Clip locator: the recording's path within the device.
    pub name: String,
    #[serde(rename = "StartTime")]
    pub start_time: DeviceTime,
    #[serde(rename = "EndTime")]
    pub end_time: DeviceTime,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub stream_type: String,
}

#[derive(Debug, Deserialize)]
pub struct BatteryValue {
    #[serde(rename = "Battery")]
    pub battery: BatteryState,
}

/// Battery and sleep state of a battery-powered device.
#[derive(Debug, Clone, Deserialize)]
pub struct BatteryState {
    #[serde(rename = "batteryPercent", default)]
    pub percent: u32,
    #[serde(rename = "chargeStatus", default)]
    pub charge_status: i64,
    #[serde(rename = "lowPower", default)]
    pub low_power: i64,
    #[serde(rename = "temperature", default)]
    pub temperature: i64,
}
