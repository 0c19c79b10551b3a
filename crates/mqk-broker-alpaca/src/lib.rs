//! Alpaca REST adapter (RT-2).
//!
//! Implements `mqk_execution::BrokerAdapter` against Alpaca's trading API
//! using a blocking `reqwest` client — the adapter trait is synchronous by
//! design (see `mqk-execution::order_router`), so calls from an async
//! runtime context must go through `tokio::task::spawn_blocking` at the
//! call site rather than making this adapter async itself.
//!
//! Also exposes typed read methods (`fetch_account`, `fetch_positions`,
//! `fetch_orders`, `fetch_fills`) returning `mqk_schemas::Broker*` shapes,
//! for callers (e.g. a daemon polling loop) that want a full account
//! snapshot rather than just the order-routing surface.

mod types;

pub use types::{AlpacaConfig, AlpacaError};

use chrono::Utc;
use mqk_execution::{
    micros_to_price, BrokerAdapter, BrokerCancelResponse, BrokerReplaceRequest,
    BrokerReplaceResponse, BrokerSubmitRequest, BrokerSubmitResponse,
};
use mqk_schemas::{BrokerAccount, BrokerFill, BrokerOrder, BrokerPosition, BrokerSnapshot};

use types::{
    AlpacaOrderRequest, AlpacaOrderResponse, AlpacaPositionResponse,
};

type AdapterResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Thin wrapper over Alpaca's `/v2/*` trading endpoints.
///
/// API keys are read by the caller (CLI/daemon config) and passed in; never
/// logged, never serialized back out.
#[derive(Clone)]
pub struct AlpacaBroker {
    config: AlpacaConfig,
    http: reqwest::blocking::Client,
}

impl AlpacaBroker {
    pub fn new(config: AlpacaConfig) -> Self {
        Self {
            config,
            http: reqwest::blocking::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.config.api_key_id)
            .header("APCA-API-SECRET-KEY", &self.config.api_secret_key)
    }

    /// Maps our internal order_type string ("market" | "stop" | "take_profit")
    /// to Alpaca's order type + the field the trigger price lands in.
    fn alpaca_order_request(req: &BrokerSubmitRequest) -> AlpacaOrderRequest {
        let side = if req.quantity >= 0 { "buy" } else { "sell" };
        let qty = req.quantity.unsigned_abs().to_string();

        let (order_type, limit_price, stop_price) = match req.order_type.as_str() {
            "stop" => ("stop".to_string(), None, req.limit_price.map(|p| p.to_string())),
            "take_profit" => ("limit".to_string(), req.limit_price.map(|p| p.to_string()), None),
            _ => ("market".to_string(), None, None),
        };

        AlpacaOrderRequest {
            symbol: req.symbol.clone(),
            qty,
            side: side.to_string(),
            r#type: order_type,
            time_in_force: req.time_in_force.clone(),
            limit_price,
            stop_price,
            client_order_id: Some(req.order_id.clone()),
        }
    }

    /// Fetch account equity/cash/currency.
    pub fn fetch_account(&self) -> AdapterResult<BrokerAccount> {
        let resp = self.authed(self.http.get(self.url("/v2/account"))).send()?;
        let status = resp.status();
        let body: types::AlpacaAccountResponse = resp.json()?;
        if !status.is_success() {
            return Err(Box::new(AlpacaError::Http {
                status: status.as_u16(),
                message: body.message.unwrap_or_default(),
            }));
        }
        Ok(BrokerAccount {
            equity: body.equity.unwrap_or_default(),
            cash: body.cash.unwrap_or_default(),
            currency: body.currency.unwrap_or_else(|| "USD".to_string()),
        })
    }

    /// Fetch all open positions.
    pub fn fetch_positions(&self) -> AdapterResult<Vec<BrokerPosition>> {
        let resp = self.authed(self.http.get(self.url("/v2/positions"))).send()?;
        let status = resp.status();
        if !status.is_success() {
            let body: types::AlpacaAccountResponse = resp.json()?;
            return Err(Box::new(AlpacaError::Http {
                status: status.as_u16(),
                message: body.message.unwrap_or_default(),
            }));
        }
        let positions: Vec<AlpacaPositionResponse> = resp.json()?;
        Ok(positions
            .into_iter()
            .map(|p| BrokerPosition {
                symbol: p.symbol,
                qty: p.qty,
                avg_price: p.avg_entry_price,
            })
            .collect())
    }

    /// Fetch orders (open + recently closed, per Alpaca's default window).
    pub fn fetch_orders(&self) -> AdapterResult<Vec<BrokerOrder>> {
        let resp = self
            .authed(self.http.get(self.url("/v2/orders")).query(&[("status", "all")]))
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body: types::AlpacaAccountResponse = resp.json()?;
            return Err(Box::new(AlpacaError::Http {
                status: status.as_u16(),
                message: body.message.unwrap_or_default(),
            }));
        }
        let orders: Vec<AlpacaOrderResponse> = resp.json()?;
        Ok(orders.into_iter().map(order_response_to_schema).collect())
    }

    /// Fills are not a separate Alpaca endpoint; they're derived from
    /// filled orders' `filled_qty`/`filled_avg_price`.
    pub fn fetch_fills(&self) -> AdapterResult<Vec<BrokerFill>> {
        let orders = self.fetch_orders()?;
        Ok(orders
            .into_iter()
            .filter(|o| o.status == "filled" || o.status == "partially_filled")
            .map(|o| BrokerFill {
                broker_fill_id: format!("fill:{}", o.broker_order_id),
                broker_order_id: o.broker_order_id,
                client_order_id: o.client_order_id,
                symbol: o.symbol,
                side: o.side,
                qty: o.qty,
                price: o.limit_price.unwrap_or_default(),
                fee: "0".to_string(),
                ts_utc: o.created_at_utc,
            })
            .collect())
    }

    /// Full snapshot, for reconcile / daemon polling.
    pub fn snapshot(&self) -> AdapterResult<BrokerSnapshot> {
        Ok(BrokerSnapshot {
            captured_at_utc: Utc::now(),
            account: self.fetch_account()?,
            orders: self.fetch_orders()?,
            fills: self.fetch_fills()?,
            positions: self.fetch_positions()?,
        })
    }
}

fn order_response_to_schema(o: AlpacaOrderResponse) -> BrokerOrder {
    BrokerOrder {
        broker_order_id: o.id,
        client_order_id: o.client_order_id.unwrap_or_default(),
        symbol: o.symbol,
        side: o.side,
        r#type: o.order_type,
        status: o.status,
        qty: o.qty,
        limit_price: o.limit_price,
        stop_price: o.stop_price,
        created_at_utc: o.created_at,
    }
}

impl BrokerAdapter for AlpacaBroker {
    fn submit_order(&self, req: BrokerSubmitRequest) -> AdapterResult<BrokerSubmitResponse> {
        let body = Self::alpaca_order_request(&req);
        let resp = self
            .authed(self.http.post(self.url("/v2/orders")))
            .json(&body)
            .send()?;
        let status = resp.status();
        let parsed: types::AlpacaRawOrderResponse = resp.json()?;
        if !status.is_success() {
            return Err(Box::new(AlpacaError::Http {
                status: status.as_u16(),
                message: parsed.message.unwrap_or_default(),
            }));
        }
        Ok(BrokerSubmitResponse {
            broker_order_id: parsed.id.ok_or("alpaca submit response missing id")?,
            submitted_at: Utc::now().timestamp() as u64,
            status: parsed.status.unwrap_or_else(|| "new".to_string()),
        })
    }

    fn cancel_order(&self, order_id: &str) -> AdapterResult<BrokerCancelResponse> {
        let resp = self
            .authed(self.http.delete(self.url(&format!("/v2/orders/{}", order_id))))
            .send()?;
        let status = resp.status();
        if !status.is_success() && status.as_u16() != 204 {
            return Err(Box::new(AlpacaError::Http {
                status: status.as_u16(),
                message: format!("cancel {} failed", order_id),
            }));
        }
        Ok(BrokerCancelResponse {
            broker_order_id: order_id.to_string(),
            cancelled_at: Utc::now().timestamp() as u64,
            status: "pending_cancel".to_string(),
        })
    }

    fn replace_order(&self, req: BrokerReplaceRequest) -> AdapterResult<BrokerReplaceResponse> {
        let patch_body = types::AlpacaReplaceRequest {
            qty: Some(req.quantity.unsigned_abs().to_string()),
            limit_price: req.limit_price.map(|p| p.to_string()),
            time_in_force: Some(req.time_in_force.clone()),
        };
        let resp = self
            .authed(
                self.http
                    .patch(self.url(&format!("/v2/orders/{}", req.broker_order_id))),
            )
            .json(&patch_body)
            .send()?;
        let status = resp.status();
        let parsed: types::AlpacaRawOrderResponse = resp.json()?;
        if !status.is_success() {
            return Err(Box::new(AlpacaError::Http {
                status: status.as_u16(),
                message: parsed.message.unwrap_or_default(),
            }));
        }
        Ok(BrokerReplaceResponse {
            broker_order_id: parsed.id.unwrap_or(req.broker_order_id),
            replaced_at: Utc::now().timestamp() as u64,
            status: parsed.status.unwrap_or_else(|| "replaced".to_string()),
        })
    }
}

/// Helper for callers building `BrokerSubmitRequest.limit_price` from an
/// internal micros price (the execution-decision surface stays integer
/// micros end to end; only this adapter's wire boundary uses `f64`).
pub fn reference_price(price_micros: i64) -> f64 {
    micros_to_price(price_micros)
}
