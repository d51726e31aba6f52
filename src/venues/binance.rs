use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::{form_urlencoded, Url};

use crate::error::ExchangeError;
use crate::metrics::{EXCHANGE_LATENCY, EXCHANGE_REQUESTS, VENUE_CONNECTIONS};
use crate::types::{
    AccountBalance, ExchangeOrder, Interval, Kline, MarketData, Order, OrderBook, OrderType,
    Quote, SymbolInfo, TradeSide,
};
use crate::venues::{validate_order, ExchangeClient};

const VENUE_NAME: &str = "BINANCE";
const RECV_WINDOW_MS: u64 = 60_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BinanceVenue {
    client: Client,
    base_url: String,
    ws_url: String,
    api_key: String,
    api_secret: String,
    stream_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct PriceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    volume: String,
    price_change_percent: String,
    high_price: String,
    low_price: String,
}

#[derive(Debug, Deserialize)]
struct Depth {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct Account {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    symbol: String,
    order_id: i64,
    #[serde(default)]
    price: Option<String>,
    orig_qty: String,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    status: String,
    side: String,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    transact_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<RawSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSymbol {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    filters: Vec<serde_json::Value>,
}

/// `<symbol>@bookTicker` stream payload
#[derive(Debug, Deserialize)]
struct BookTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    best_bid_price: String,
    #[serde(rename = "a")]
    best_ask_price: String,
}

fn num(field: &str, raw: &str) -> Result<f64, ExchangeError> {
    raw.parse()
        .map_err(|_| ExchangeError::Parse(format!("{} is not a number: {}", field, raw)))
}

fn parse_level(level: &(String, String)) -> Result<(f64, f64), ExchangeError> {
    Ok((num("price", &level.0)?, num("qty", &level.1)?))
}

fn value_f64(v: &serde_json::Value, field: &str) -> Result<f64, ExchangeError> {
    match v {
        serde_json::Value::String(s) => num(field, s),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExchangeError::Parse(format!("{} out of range", field))),
        _ => Err(ExchangeError::Parse(format!("{} has unexpected type", field))),
    }
}

fn value_i64(v: &serde_json::Value, field: &str) -> Result<i64, ExchangeError> {
    v.as_i64()
        .ok_or_else(|| ExchangeError::Parse(format!("{} is not an integer", field)))
}

/// Kline rows arrive as heterogeneous arrays
fn parse_kline(row: &[serde_json::Value]) -> Result<Kline, ExchangeError> {
    if row.len() < 11 {
        return Err(ExchangeError::Parse(format!(
            "kline row has {} fields, expected at least 11",
            row.len()
        )));
    }
    Ok(Kline {
        timestamp: value_i64(&row[0], "openTime")?,
        open: value_f64(&row[1], "open")?,
        high: value_f64(&row[2], "high")?,
        low: value_f64(&row[3], "low")?,
        close: value_f64(&row[4], "close")?,
        volume: value_f64(&row[5], "volume")?,
        close_time: value_i64(&row[6], "closeTime")?,
        quote_asset_volume: value_f64(&row[7], "quoteAssetVolume")?,
        number_of_trades: value_i64(&row[8], "numberOfTrades")?.max(0) as u64,
        taker_buy_base_asset_volume: value_f64(&row[9], "takerBuyBaseAssetVolume")?,
        taker_buy_quote_asset_volume: value_f64(&row[10], "takerBuyQuoteAssetVolume")?,
    })
}

fn convert_order(raw: RawOrder) -> Result<ExchangeOrder, ExchangeError> {
    let side = TradeSide::from_exchange_str(&raw.side)
        .ok_or_else(|| ExchangeError::Parse(format!("unknown side: {}", raw.side)))?;
    let quantity = num("origQty", &raw.orig_qty)?;
    let mut price = match &raw.price {
        Some(p) => num("price", p)?,
        None => 0.0,
    };
    // Market orders report price 0; derive the average fill instead
    if price == 0.0 {
        if let (Some(executed), Some(quote)) = (&raw.executed_qty, &raw.cummulative_quote_qty) {
            let executed = num("executedQty", executed)?;
            let quote = num("cummulativeQuoteQty", quote)?;
            if executed > 0.0 {
                price = quote / executed;
            }
        }
    }
    Ok(ExchangeOrder {
        symbol: raw.symbol,
        side,
        quantity,
        price,
        order_id: raw.order_id.to_string(),
        status: raw.status,
        timestamp: raw.transact_time.or(raw.time).unwrap_or_default(),
    })
}

fn convert_symbol(raw: RawSymbol) -> Result<SymbolInfo, ExchangeError> {
    let lot = raw
        .filters
        .iter()
        .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some("LOT_SIZE"));
    let (min_qty, step_size) = match lot {
        Some(f) => (
            f.get("minQty").map(|v| value_f64(v, "minQty")).transpose()?,
            f.get("stepSize").map(|v| value_f64(v, "stepSize")).transpose()?,
        ),
        None => (None, None),
    };
    Ok(SymbolInfo {
        symbol: raw.symbol,
        status: raw.status,
        base_asset: raw.base_asset,
        quote_asset: raw.quote_asset,
        min_qty,
        step_size,
    })
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Percent-encodes request parameters in order; the signature covers exactly
/// this string.
fn encode_query(params: &[(&str, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

impl BinanceVenue {
    pub fn new(
        api_key: String,
        api_secret: String,
        base_url: String,
        ws_url: String,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            stream_task: Mutex::new(None),
        })
    }

    /// Same endpoints and connection pool, different account
    fn with_credentials(&self, api_key: &str, api_secret: &str) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            ws_url: self.ws_url.clone(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            stream_task: Mutex::new(None),
        }
    }

    fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// Hex HMAC-SHA256 of the query string, keyed with the API secret
    pub fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &'static str,
        path: &str,
        mut params: Vec<(&str, String)>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        if signed {
            if !self.has_credentials() {
                return Err(ExchangeError::MissingCredentials);
            }
            params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
            params.push(("timestamp", now_millis().to_string()));
        }

        let mut query = encode_query(&params);
        if signed {
            let signature = self.sign(&query);
            query = format!("{}&signature={}", query, signature);
        }

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut req = self.client.request(method, &url);
        if signed {
            req = req.header("X-MBX-APIKEY", &self.api_key);
        }

        let started = Instant::now();
        let result = self.send(req).await;
        EXCHANGE_LATENCY
            .with_label_values(&[endpoint])
            .observe(started.elapsed().as_secs_f64());
        EXCHANGE_REQUESTS
            .with_label_values(&[endpoint, if result.is_ok() { "ok" } else { "error" }])
            .inc();

        if let Err(e) = &result {
            error!(endpoint = endpoint, error = %e, "Binance request failed");
        }
        result
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ExchangeError> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                // -1121 Invalid symbol
                Ok(err) if err.code == -1121 => ExchangeError::SymbolNotFound(err.msg),
                Ok(err) => ExchangeError::Api {
                    code: err.code,
                    msg: err.msg,
                },
                Err(_) if status == StatusCode::NOT_FOUND => {
                    ExchangeError::ConnectionFailed(format!("endpoint not found ({})", status))
                }
                Err(_) => ExchangeError::Api {
                    code: status.as_u16() as i64,
                    msg: body,
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    /// Subscribe to `<symbol>@bookTicker` and forward every update as a quote.
    /// The stream is not reconnected when the exchange closes it.
    pub async fn stream_quotes(
        &self,
        symbols: Vec<String>,
        quote_tx: mpsc::Sender<Quote>,
    ) -> Result<(), ExchangeError> {
        if symbols.is_empty() {
            return Err(ExchangeError::WebSocket("Empty symbol list".to_string()));
        }

        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@bookTicker", s.to_lowercase()))
            .collect();
        let ws_url = format!("{}/{}", self.ws_url, streams.join("/"));
        let url = Url::parse(&ws_url).map_err(|e| ExchangeError::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ExchangeError::ConnectionFailed(e.to_string()))?;
        info!(symbols = ?symbols, "Binance ticker stream connected");
        VENUE_CONNECTIONS.with_label_values(&[VENUE_NAME]).set(1.0);

        let (_write, mut read) = ws_stream.split();

        let handle = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let ticker = match serde_json::from_str::<BookTicker>(text.as_str()) {
                            Ok(t) => t,
                            Err(e) => {
                                debug!(error = %e, "Ignoring non-ticker message");
                                continue;
                            }
                        };
                        let quote = Quote {
                            symbol: ticker.symbol,
                            bid: ticker.best_bid_price.parse().unwrap_or(0.0),
                            ask: ticker.best_ask_price.parse().unwrap_or(0.0),
                            venue: VENUE_NAME.to_string(),
                            timestamp: now_millis().max(0) as u64,
                        };
                        if quote_tx.send(quote).await.is_err() {
                            debug!("Quote receiver dropped; closing ticker stream");
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        warn!(frame = ?frame, "Binance ticker stream closed by exchange");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "Error receiving ticker message");
                        break;
                    }
                }
            }
            VENUE_CONNECTIONS.with_label_values(&[VENUE_NAME]).set(0.0);
        });

        if let Some(previous) = self.stream_task.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeClient for BinanceVenue {
    fn name(&self) -> &str {
        VENUE_NAME
    }

    fn for_account(&self, api_key: &str, api_secret: &str) -> Arc<dyn ExchangeClient> {
        Arc::new(self.with_credentials(api_key, api_secret))
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .request(Method::GET, "ping", "/api/v3/ping", vec![], false)
            .await?;
        Ok(())
    }

    async fn current_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let ticker: PriceTicker = self
            .request(
                Method::GET,
                "ticker_price",
                "/api/v3/ticker/price",
                vec![("symbol", symbol.to_uppercase())],
                false,
            )
            .await?;
        num("price", &ticker.price)
    }

    async fn market_data(&self, symbol: &str) -> Result<MarketData, ExchangeError> {
        let t: Ticker24h = self
            .request(
                Method::GET,
                "ticker_24hr",
                "/api/v3/ticker/24hr",
                vec![("symbol", symbol.to_uppercase())],
                false,
            )
            .await?;
        Ok(MarketData {
            symbol: t.symbol,
            price: num("lastPrice", &t.last_price)?,
            volume: num("volume", &t.volume)?,
            change_24h: num("priceChangePercent", &t.price_change_percent)?,
            high_24h: num("highPrice", &t.high_price)?,
            low_24h: num("lowPrice", &t.low_price)?,
        })
    }

    async fn order_book(&self, symbol: &str, limit: u32) -> Result<OrderBook, ExchangeError> {
        let symbol = symbol.to_uppercase();
        let depth: Depth = self
            .request(
                Method::GET,
                "depth",
                "/api/v3/depth",
                vec![("symbol", symbol.clone()), ("limit", limit.to_string())],
                false,
            )
            .await?;
        Ok(OrderBook {
            symbol,
            bids: depth.bids.iter().map(parse_level).collect::<Result<_, _>>()?,
            asks: depth.asks.iter().map(parse_level).collect::<Result<_, _>>()?,
            timestamp: now_millis(),
        })
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .request(
                Method::GET,
                "klines",
                "/api/v3/klines",
                vec![
                    ("symbol", symbol.to_uppercase()),
                    ("interval", interval.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
                false,
            )
            .await?;
        rows.iter().map(|r| parse_kline(r)).collect()
    }

    async fn account_balances(&self) -> Result<Vec<AccountBalance>, ExchangeError> {
        let account: Account = self
            .request(Method::GET, "account", "/api/v3/account", vec![], true)
            .await?;
        let mut balances = Vec::new();
        for raw in account.balances {
            let free = num("free", &raw.free)?;
            let locked = num("locked", &raw.locked)?;
            let total = free + locked;
            if total > 0.0 {
                balances.push(AccountBalance {
                    asset: raw.asset,
                    free,
                    locked,
                    total,
                });
            }
        }
        Ok(balances)
    }

    async fn place_order(&self, order: &Order) -> Result<ExchangeOrder, ExchangeError> {
        validate_order(order)?;

        let mut params = vec![
            ("symbol", order.symbol.to_uppercase()),
            ("side", order.side.as_exchange_str().to_string()),
            (
                "type",
                match order.order_type {
                    OrderType::Market => "MARKET",
                    OrderType::Limit => "LIMIT",
                }
                .to_string(),
            ),
            ("quantity", order.quantity.to_string()),
        ];
        if let (OrderType::Limit, Some(price)) = (order.order_type, order.price) {
            params.push(("price", price.to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }
        params.push(("newOrderRespType", "FULL".to_string()));

        info!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = order.quantity,
            order_type = ?order.order_type,
            "Submitting order to Binance"
        );
        let raw: RawOrder = self
            .request(Method::POST, "order", "/api/v3/order", params, true)
            .await?;
        convert_order(raw)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool, ExchangeError> {
        let _: serde_json::Value = self
            .request(
                Method::DELETE,
                "cancel_order",
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_uppercase()),
                    ("orderId", order_id.to_string()),
                ],
                true,
            )
            .await?;
        Ok(true)
    }

    async fn order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<ExchangeOrder, ExchangeError> {
        let raw: RawOrder = self
            .request(
                Method::GET,
                "order_status",
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_uppercase()),
                    ("orderId", order_id.to_string()),
                ],
                true,
            )
            .await?;
        convert_order(raw)
    }

    async fn order_history(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError> {
        let raw: Vec<RawOrder> = self
            .request(
                Method::GET,
                "all_orders",
                "/api/v3/allOrders",
                vec![("symbol", symbol.to_uppercase()), ("limit", limit.to_string())],
                true,
            )
            .await?;
        raw.into_iter().map(convert_order).collect()
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<ExchangeOrder>, ExchangeError> {
        let params = symbol
            .map(|s| vec![("symbol", s.to_uppercase())])
            .unwrap_or_default();
        let raw: Vec<RawOrder> = self
            .request(Method::GET, "open_orders", "/api/v3/openOrders", params, true)
            .await?;
        raw.into_iter().map(convert_order).collect()
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError> {
        let symbol = symbol.to_uppercase();
        let info: ExchangeInfo = self
            .request(
                Method::GET,
                "exchange_info",
                "/api/v3/exchangeInfo",
                vec![("symbol", symbol.clone())],
                false,
            )
            .await?;
        let raw = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.clone()))?;
        convert_symbol(raw)
    }

    async fn stop(&self) -> Result<(), ExchangeError> {
        if let Some(handle) = self.stream_task.lock().await.take() {
            handle.abort();
            VENUE_CONNECTIONS.with_label_values(&[VENUE_NAME]).set(0.0);
            info!("Binance ticker stream stopped");
        }
        Ok(())
    }
}
