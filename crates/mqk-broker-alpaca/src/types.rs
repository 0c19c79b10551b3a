//! Wire types for Alpaca's trading REST API.
//!
//! All decimal/quantity fields are carried as `String` on the wire, same
//! convention as `mqk_schemas::Broker*` — no floats at rest, parsed
//! deterministically by whichever downstream crate needs a number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug)]
pub struct AlpacaConfig {
    pub base_url: String,
    pub api_key_id: String,
    pub api_secret_key: String,
}

impl AlpacaConfig {
    pub fn new(base_url: impl Into<String>, api_key_id: impl Into<String>, api_secret_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key_id: api_key_id.into(),
            api_secret_key: api_secret_key.into(),
        }
    }

    /// Alpaca's paper-trading base URL, for local/dev wiring.
    pub fn paper(api_key_id: impl Into<String>, api_secret_key: impl Into<String>) -> Self {
        Self::new("https://paper-api.alpaca.markets", api_key_id, api_secret_key)
    }
}

#[derive(Debug)]
pub enum AlpacaError {
    Http { status: u16, message: String },
}

impl fmt::Display for AlpacaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlpacaError::Http { status, message } => {
                write!(f, "alpaca http error (status {}): {}", status, message)
            }
        }
    }
}

impl std::error::Error for AlpacaError {}

#[derive(Debug, Serialize)]
pub struct AlpacaOrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: String,
    pub r#type: String,
    pub time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AlpacaReplaceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlpacaOrderResponse {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub status: String,
    pub qty: String,
    pub limit_price: Option<String>,
    pub stop_price: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Looser shape for submit/replace responses, where a non-2xx status may
/// carry only a `message` field and no order body.
#[derive(Debug, Deserialize, Default)]
pub struct AlpacaRawOrderResponse {
    pub id: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AlpacaAccountResponse {
    pub equity: Option<String>,
    pub cash: Option<String>,
    pub currency: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlpacaPositionResponse {
    pub symbol: String,
    pub qty: String,
    pub avg_entry_price: String,
}
