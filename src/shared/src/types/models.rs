//! Canonical models
//!
//! Provider-independent shapes returned by the engine's domain operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CATALOG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub id: String,
    pub code: String,
    pub name: String,
    pub flag_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub code: String,
    pub name: String,
    pub icon_url: Option<String>,
}

/// One priced offer: a service in a country, optionally through one operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceData {
    pub country: String,
    pub service: String,
    pub operator: Option<String>,
    pub cost: f64,
    pub count: u64,
}

// ============================================================================
// ACTIVATIONS
// ============================================================================

/// A rented number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberResult {
    pub activation_id: String,
    pub phone_number: String,
    pub country_code: String,
    pub service_code: String,
    /// Price in internal units, after multiplier and markup
    pub price: f64,
    /// Price as quoted by the provider
    pub raw_price: f64,
    pub expires_at: DateTime<Utc>,
}

/// Lifecycle state of an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    #[default]
    Pending,
    Received,
    Completed,
    Cancelled,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Pending => "pending",
            LifecycleStatus::Received => "received",
            LifecycleStatus::Completed => "completed",
            LifecycleStatus::Cancelled => "cancelled",
        }
    }

    /// No further SMS can arrive
    pub fn is_final(&self) -> bool {
        matches!(self, LifecycleStatus::Completed | LifecycleStatus::Cancelled)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "waiting" => Ok(LifecycleStatus::Pending),
            "received" => Ok(LifecycleStatus::Received),
            "completed" | "finished" => Ok(LifecycleStatus::Completed),
            "cancelled" | "canceled" => Ok(LifecycleStatus::Cancelled),
            _ => Err(format!("Invalid lifecycle status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusResult {
    pub status: LifecycleStatus,
    pub messages: Vec<String>,
}

impl StatusResult {
    pub fn pending() -> Self {
        Self::default()
    }
}

/// Outcome of a state-changing activation call (cancel, complete, resend)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    /// Provider's reply, when it sent one
    pub message: Option<String>,
}

// ============================================================================
// WEBHOOKS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingSms {
    pub text: String,
    pub code: Option<String>,
    pub sender: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSms {
    pub activation_id: String,
    pub sms: IncomingSms,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_status_parsing() {
        assert_eq!(
            "Canceled".parse::<LifecycleStatus>().unwrap(),
            LifecycleStatus::Cancelled
        );
        assert_eq!(
            "waiting".parse::<LifecycleStatus>().unwrap(),
            LifecycleStatus::Pending
        );
        assert!("gone".parse::<LifecycleStatus>().is_err());
        assert!(LifecycleStatus::Completed.is_final());
        assert!(!LifecycleStatus::Received.is_final());
    }

    #[test]
    fn test_number_result_serialization() {
        let result = NumberResult {
            activation_id: "123".to_string(),
            phone_number: "79990001122".to_string(),
            country_code: "ru".to_string(),
            service_code: "tg".to_string(),
            price: 12.5,
            raw_price: 10.0,
            expires_at: Utc::now(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["activationId"], "123");
        assert_eq!(json["phoneNumber"], "79990001122");
        assert_eq!(json["rawPrice"], 10.0);
    }
}
