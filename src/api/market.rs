use futures_util::future::try_join_all;
use serde::Deserialize;
use serde_json::json;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::Filter;

use crate::api::{ok, with_services, ApiResult};
use crate::services::Services;
use crate::types::Interval;
use crate::venues::{DEFAULT_DEPTH_LIMIT, DEFAULT_KLINE_LIMIT};

pub const DEFAULT_SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "BNBUSDT"];
const MAX_ROWS: u32 = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct SymbolsQuery {
    pub symbols: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DepthQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    pub interval: Option<String>,
    pub limit: Option<u32>,
}

fn parse_symbols(raw: Option<&str>) -> Vec<String> {
    let symbols: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
    } else {
        symbols
    }
}

async fn market_data(query: SymbolsQuery, services: Services) -> ApiResult {
    let symbols = parse_symbols(query.symbols.as_deref());
    let data = try_join_all(
        symbols
            .iter()
            .map(|symbol| services.exchange.market_data(symbol)),
    )
    .await?;
    Ok(ok(data))
}

async fn ticker(symbol: String, services: Services) -> ApiResult {
    let data = services.exchange.market_data(&symbol).await?;
    Ok(ok(data))
}

async fn price(symbol: String, services: Services) -> ApiResult {
    let symbol = symbol.to_uppercase();
    let price = services.exchange.current_price(&symbol).await?;
    Ok(ok(json!({ "symbol": symbol, "price": price })))
}

async fn order_book(symbol: String, query: DepthQuery, services: Services) -> ApiResult {
    let limit = query.limit.unwrap_or(DEFAULT_DEPTH_LIMIT).clamp(1, MAX_ROWS);
    let book = services.exchange.order_book(&symbol, limit).await?;
    Ok(ok(book))
}

async fn chart(symbol: String, query: ChartQuery, services: Services) -> ApiResult {
    let interval = match query.interval.as_deref() {
        Some(raw) => raw.parse::<Interval>()?,
        None => Interval::OneHour,
    };
    let limit = query.limit.unwrap_or(DEFAULT_KLINE_LIMIT).clamp(1, MAX_ROWS);
    let klines = services.exchange.klines(&symbol, interval, limit).await?;
    Ok(ok(klines))
}

pub fn routes(services: Services) -> BoxedFilter<(Response,)> {
    let svc = with_services(services);

    let data = warp::path!("api" / "market" / "data")
        .and(warp::get())
        .and(warp::query::<SymbolsQuery>())
        .and(svc.clone())
        .and_then(market_data);

    let ticker = warp::path!("api" / "market" / "ticker" / String)
        .and(warp::get())
        .and(svc.clone())
        .and_then(ticker);

    let price = warp::path!("api" / "market" / "price" / String)
        .and(warp::get())
        .and(svc.clone())
        .and_then(price);

    let order_book = warp::path!("api" / "market" / "orderbook" / String)
        .and(warp::get())
        .and(warp::query::<DepthQuery>())
        .and(svc.clone())
        .and_then(order_book);

    let chart = warp::path!("api" / "market" / "chart" / String)
        .and(warp::get())
        .and(warp::query::<ChartQuery>())
        .and(svc)
        .and_then(chart);

    data.or(ticker)
        .unify()
        .or(price)
        .unify()
        .or(order_book)
        .unify()
        .or(chart)
        .unify()
        .boxed()
}
