use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreError;
use crate::market_data::MarketDataProvider;
use crate::models::{Candle, PositionSide, Timeframe};
use crate::venue::{CancelOutcome, ExecutionVenue, OpenOrder, OrderType, VenuePosition};

pub const BINANCE_FUTURES_BASE: &str = "https://fapi.binance.com";
const RATE_LIMIT_RPM: u32 = 600;
const MAX_KLINES: usize = 1500;
const DEFAULT_RECV_WINDOW_MS: u64 = 5000;
/// "Unknown order sent." on cancel
const UNKNOWN_ORDER_CODE: i64 = -2011;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
pub struct BinanceCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Binance USD-M futures REST client
///
/// Serves candles to the fetcher and account state to the position monitor. Clones
/// share the HTTP pool and the rate limiter.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    credentials: Option<BinanceCredentials>,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: String,
    entry_price: String,
    mark_price: String,
    un_realized_profit: String,
    #[serde(default)]
    position_side: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    mark_price: String,
}

#[derive(Debug, Deserialize)]
struct UserTrade {
    price: String,
    time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenOrder {
    order_id: i64,
    symbol: String,
    #[serde(rename = "type")]
    order_type: String,
    #[serde(default)]
    stop_price: Option<String>,
}

/// Failure of a single REST call, before it is mapped onto the caller's error
#[derive(Debug)]
enum RequestError {
    Api { status: u16, code: i64, msg: String },
    Http { status: u16, body: String },
    Transport(String),
    Decode(String),
    Unsigned,
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Api { status, code, msg } => {
                write!(f, "Binance API error {} (code {}): {}", status, code, msg)
            }
            RequestError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            RequestError::Transport(e) => write!(f, "network error: {}", e),
            RequestError::Decode(e) => write!(f, "decode error: {}", e),
            RequestError::Unsigned => f.write_str("API credentials required for signed endpoint"),
        }
    }
}

impl From<RequestError> for CoreError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Unsigned => CoreError::Config(e.to_string()),
            other => CoreError::VenueUnreachable(other.to_string()),
        }
    }
}

fn parse_num(field: &str, raw: &str) -> Result<f64, CoreError> {
    raw.parse()
        .map_err(|_| CoreError::VenueUnreachable(format!("invalid {} '{}'", field, raw)))
}

impl BinanceFuturesClient {
    pub fn new(
        base_url: &str,
        credentials: Option<BinanceCredentials>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).ok_or("zero rate limit")?);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, RequestError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| RequestError::Transport(format!("invalid url: {}", e)))?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Append timestamp, recvWindow and the HMAC-SHA256 signature of the query string
    fn sign(&self, mut url: Url) -> Result<(Url, String), RequestError> {
        let credentials = self.credentials.as_ref().ok_or(RequestError::Unsigned)?;

        url.query_pairs_mut()
            .append_pair("timestamp", &Utc::now().timestamp_millis().to_string())
            .append_pair("recvWindow", &self.recv_window_ms.to_string());

        let query = url.query().unwrap_or_default().to_string();
        let mut mac = HmacSha256::new_from_slice(credentials.api_secret.as_bytes())
            .map_err(|e| RequestError::Transport(format!("failed to init signer: {}", e)))?;
        mac.update(query.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        url.query_pairs_mut().append_pair("signature", &signature);
        Ok((url, credentials.api_key.clone()))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T, RequestError> {
        let url = self.url(path, params)?;
        let (url, api_key) = if signed {
            let (url, key) = self.sign(url)?;
            (url, Some(key))
        } else {
            (url, None)
        };

        self.rate_limiter.until_ready().await;

        let mut builder = self.client.request(method, url);
        if let Some(key) = api_key {
            builder = builder.header("X-MBX-APIKEY", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ApiError>(&body) {
                Ok(api) => RequestError::Api {
                    status: status.as_u16(),
                    code: api.code,
                    msg: api.msg,
                },
                Err(_) => RequestError::Http {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RequestError::Decode(e.to_string()))
    }
}

fn parse_kline(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    let open_time = Utc.timestamp_millis_opt(row[0].as_i64()?).single()?;
    let field = |i: usize| -> Option<f64> { row[i].as_str()?.parse().ok() };

    Some(Candle {
        timestamp: open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

#[async_trait]
impl MarketDataProvider for BinanceFuturesClient {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, CoreError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("startTime", start.timestamp_millis().to_string()),
            ("endTime", end.timestamp_millis().to_string()),
            ("limit", limit.clamp(1, MAX_KLINES).to_string()),
        ];

        let rows: Vec<Vec<serde_json::Value>> = self
            .request(Method::GET, "/fapi/v1/klines", &params, false)
            .await
            .map_err(|e| CoreError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: e.to_string(),
            })?;

        let candles: Vec<Candle> = rows.iter().filter_map(|row| parse_kline(row)).collect();
        if candles.len() < rows.len() {
            tracing::warn!(
                symbol = %symbol,
                timeframe = %timeframe,
                skipped = rows.len() - candles.len(),
                "Skipped malformed klines"
            );
        }

        Ok(candles)
    }
}

#[async_trait]
impl ExecutionVenue for BinanceFuturesClient {
    async fn get_position(&self, symbol: &str) -> Result<Option<VenuePosition>, CoreError> {
        let risks: Vec<PositionRisk> = self
            .request(
                Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", symbol.to_string())],
                true,
            )
            .await?;

        for risk in risks.iter().filter(|r| r.symbol == symbol) {
            let amount = parse_num("positionAmt", &risk.position_amt)?;
            if amount == 0.0 {
                continue;
            }

            let side = match risk.position_side.as_deref() {
                Some("LONG") => PositionSide::Long,
                Some("SHORT") => PositionSide::Short,
                _ if amount > 0.0 => PositionSide::Long,
                _ => PositionSide::Short,
            };

            return Ok(Some(VenuePosition {
                symbol: risk.symbol.clone(),
                side,
                quantity: amount.abs(),
                entry_price: parse_num("entryPrice", &risk.entry_price)?,
                mark_price: parse_num("markPrice", &risk.mark_price)?,
                unrealized_pnl: parse_num("unRealizedProfit", &risk.un_realized_profit)?,
            }));
        }

        Ok(None)
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<f64, CoreError> {
        let index: PremiumIndex = self
            .request(
                Method::GET,
                "/fapi/v1/premiumIndex",
                &[("symbol", symbol.to_string())],
                false,
            )
            .await?;

        parse_num("markPrice", &index.mark_price)
    }

    async fn last_fill_price(&self, symbol: &str) -> Result<Option<f64>, CoreError> {
        let trades: Vec<UserTrade> = self
            .request(
                Method::GET,
                "/fapi/v1/userTrades",
                &[("symbol", symbol.to_string()), ("limit", "5".to_string())],
                true,
            )
            .await?;

        trades
            .iter()
            .max_by_key(|t| t.time)
            .map(|t| parse_num("price", &t.price))
            .transpose()
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<CancelOutcome, CoreError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];

        match self
            .request::<serde_json::Value>(Method::DELETE, "/fapi/v1/order", &params, true)
            .await
        {
            Ok(_) => {
                tracing::debug!(symbol = %symbol, order_id = %order_id, "Cancelled order");
                Ok(CancelOutcome::Cancelled)
            }
            Err(RequestError::Api { code, .. }) if code == UNKNOWN_ORDER_CODE => {
                Ok(CancelOutcome::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, CoreError> {
        let raw: Vec<RawOpenOrder> = self
            .request(
                Method::GET,
                "/fapi/v1/openOrders",
                &[("symbol", symbol.to_string())],
                true,
            )
            .await?;

        Ok(raw
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id.to_string(),
                symbol: o.symbol,
                order_type: OrderType::parse(&o.order_type),
                stop_price: o
                    .stop_price
                    .and_then(|p| p.parse::<f64>().ok())
                    .filter(|p| *p > 0.0),
            })
            .collect())
    }
}
