//! Consumption usage records from `az consumption usage list`.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct MeterDetails {
    #[serde(default)]
    pub meter_category: Option<String>,
    #[serde(default)]
    pub meter_name: Option<String>,
}

/// A single daily usage line.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// ISO timestamp, only the date part is used.
    pub usage_start: String,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub instance_location: Option<String>,
    #[serde(default)]
    pub consumed_service: Option<String>,
    #[serde(default)]
    pub meter_details: Option<MeterDetails>,
    /// JSON encoded string with extra fields such as `ServiceType`.
    #[serde(default)]
    pub additional_info: Option<String>,
    /// Hours for compute meters. The CLI emits this as a string.
    #[serde(deserialize_with = "de_number")]
    pub quantity: f64,
    #[serde(default, deserialize_with = "de_number")]
    pub pretax_cost: f64,
}

impl UsageRecord {
    /// `YYYY-MM-DD` part of `usage_start`.
    pub fn date(&self) -> &str {
        self.usage_start.get(..10).unwrap_or(&self.usage_start)
    }

    pub fn is_virtual_machine(&self) -> bool {
        let category = self
            .meter_details
            .as_ref()
            .and_then(|m| m.meter_category.as_deref());
        match category {
            Some(c) => c.eq_ignore_ascii_case("Virtual Machines"),
            None => self
                .consumed_service
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("Microsoft.Compute")),
        }
    }

    /// VM size, from `additionalInfo.ServiceType` or the meter name.
    pub fn sku(&self) -> Option<String> {
        let from_info = self
            .additional_info
            .as_deref()
            .and_then(|info| serde_json::from_str::<serde_json::Value>(info).ok())
            .and_then(|v| v.get("ServiceType").and_then(|s| s.as_str()).map(str::to_string));
        from_info.or_else(|| {
            self.meter_details
                .as_ref()
                .and_then(|m| m.meter_name.clone())
        })
    }

    pub fn location(&self) -> String {
        self.instance_location
            .as_deref()
            .unwrap_or("unknown")
            .to_lowercase()
    }
}

fn de_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("number out of range")),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid number '{s}': {e}"))),
        serde_json::Value::Null => Ok(0.0),
        other => Err(serde::de::Error::custom(format!("expected number, got {other}"))),
    }
}
