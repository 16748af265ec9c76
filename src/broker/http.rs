//! REST broker client
//!
//! Speaks the Alpaca-style trading and market data APIs: orders under the
//! trading base URL, latest quotes under the data base URL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{
    AssetInfo, BrokerError, BrokerGateway, CreateOrderRequest, MAX_QUOTE_BATCH, OrderAck, Quote,
};
use crate::config::BrokerConfig;
use crate::orders::OrderSize;

#[derive(Debug, Serialize)]
struct OrderBody<'a> {
    symbol: &'a str,
    side: &'a str,
    #[serde(rename = "type")]
    order_type: &'a str,
    time_in_force: &'a str,
    client_order_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notional: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderReply {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    #[serde(rename = "bp")]
    bid: Decimal,
    #[serde(rename = "ap")]
    ask: Decimal,
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct LatestQuoteReply {
    quote: QuoteBody,
}

#[derive(Debug, Deserialize)]
struct LatestQuotesReply {
    #[serde(default)]
    quotes: HashMap<String, QuoteBody>,
}

#[derive(Debug, Deserialize)]
struct AssetReply {
    symbol: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    tradable: bool,
    #[serde(default)]
    fractionable: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    #[serde(default)]
    message: String,
}

fn into_quote(symbol: String, body: QuoteBody) -> Quote {
    Quote {
        symbol,
        bid: body.bid,
        ask: body.ask,
        timestamp: body.timestamp,
    }
}

#[derive(Debug, Clone)]
pub struct HttpBroker {
    client: Client,
    api_key: String,
    api_secret: String,
    trading_base_url: String,
    data_base_url: String,
    timeout_ms: u64,
}

impl HttpBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            trading_base_url: config.base_url.trim_end_matches('/').to_string(),
            data_base_url: config.data_url.trim_end_matches('/').to_string(),
            timeout_ms: config.request_timeout_ms,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }

    fn transport_error(&self, e: reqwest::Error) -> BrokerError {
        if e.is_timeout() {
            BrokerError::Timeout(self.timeout_ms)
        } else {
            BrokerError::Unavailable(e.to_string())
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, BrokerError> {
        let response = self
            .authed(req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorReply>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        Err(match status {
            StatusCode::NOT_FOUND => BrokerError::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => {
                BrokerError::Unavailable(format!("rate limited: {}", message))
            }
            s if s.is_server_error() => BrokerError::Unavailable(format!("{}: {}", s, message)),
            s => BrokerError::Rejected {
                status: s.as_u16(),
                message,
            },
        })
    }

    async fn json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, BrokerError> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BrokerGateway for HttpBroker {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create_order(&self, req: &CreateOrderRequest) -> Result<OrderAck, BrokerError> {
        let (qty, notional) = match req.size {
            OrderSize::Quantity(q) => (Some(q.to_string()), None),
            OrderSize::Notional(n) => (None, Some(n.round_dp(2).to_string())),
        };
        let body = OrderBody {
            symbol: &req.symbol,
            side: req.side.as_str(),
            order_type: "market",
            time_in_force: "day",
            client_order_id: &req.client_order_id,
            qty,
            notional,
        };

        let url = format!("{}/v2/orders", self.trading_base_url);
        let reply: OrderReply = self.json(self.client.post(&url).json(&body)).await?;

        tracing::info!(
            symbol = %req.symbol,
            client_order_id = %req.client_order_id,
            broker_order_id = %reply.id,
            "Broker accepted order"
        );
        Ok(OrderAck {
            broker_order_id: reply.id,
            status: reply.status,
        })
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let url = format!("{}/v2/orders/{}", self.trading_base_url, broker_order_id);
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_base_url, symbol);
        let reply: LatestQuoteReply = self.json(self.client.get(&url)).await?;
        Ok(into_quote(symbol.to_string(), reply.quote))
    }

    async fn get_multi_quotes(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Quote>, BrokerError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        if symbols.len() > MAX_QUOTE_BATCH {
            return Err(BrokerError::Rejected {
                status: 400,
                message: format!("at most {} symbols per request", MAX_QUOTE_BATCH),
            });
        }

        let url = format!("{}/v2/stocks/quotes/latest", self.data_base_url);
        let reply: LatestQuotesReply = self
            .json(self.client.get(&url).query(&[("symbols", symbols.join(","))]))
            .await?;

        Ok(reply
            .quotes
            .into_iter()
            .map(|(symbol, body)| (symbol.clone(), into_quote(symbol, body)))
            .collect())
    }

    async fn list_assets(&self) -> Result<Vec<AssetInfo>, BrokerError> {
        let url = format!("{}/v2/assets", self.trading_base_url);
        let assets: Vec<AssetReply> = self
            .json(
                self.client
                    .get(&url)
                    .query(&[("status", "active"), ("asset_class", "us_equity")]),
            )
            .await?;

        Ok(assets
            .into_iter()
            .map(|a| AssetInfo {
                symbol: a.symbol,
                name: a.name,
                tradable: a.tradable,
                fractionable: a.fractionable,
            })
            .collect())
    }
}
