//! Operator trading-control commands.
//!
//! These talk over HTTP to a running `mqk-daemon` rather than touching a
//! runtime directly — the CLI process has no engine state of its own, so
//! `enable`/`disable`/`emergency-stop` are just POSTs against the daemon's
//! `/v1/trading/*` control routes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TradingAction {
    Enable,
    Disable,
    EmergencyStop,
}

impl TradingAction {
    fn path(self) -> &'static str {
        match self {
            TradingAction::Enable => "/v1/trading/enable",
            TradingAction::Disable => "/v1/trading/disable",
            TradingAction::EmergencyStop => "/v1/trading/emergency-stop",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TradingRequest {
    pub daemon_url: String,
    pub action: TradingAction,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct TradingControlBody {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradingControlResponse {
    trading_enabled: bool,
    action: String,
    reason: Option<String>,
}

/// Issue the control request and print the daemon's response.
pub async fn dispatch(req: TradingRequest) -> Result<()> {
    let url = format!("{}{}", req.daemon_url.trim_end_matches('/'), req.action.path());

    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .json(&TradingControlBody { reason: req.reason })
        .send()
        .await
        .with_context(|| format!("request to {} failed", url))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("daemon returned {}: {}", status, body);
    }

    let parsed: TradingControlResponse = resp
        .json()
        .await
        .context("failed to parse daemon trading-control response")?;

    println!("trading_enabled={}", parsed.trading_enabled);
    println!("action={}", parsed.action);
    if let Some(r) = parsed.reason {
        println!("reason={}", r);
    }

    Ok(())
}
