use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::Filter;

use crate::api::{created, json_body, ok, ok_with_message, with_auth, with_services};
use crate::api::{ApiResult, AuthContext};
use crate::error::{AppError, Result};
use crate::metrics::TRADES_RECORDED;
use crate::models::{Bot, NewTradeRequest, Trade};
use crate::realtime::{BOT_UPDATE, TRADE_UPDATE};
use crate::services::Services;
use crate::store::{TradeFilter, DEFAULT_TRADE_LIMIT};
use crate::strategy::risk::{position_size, stop_loss_price, take_profit_price};
use crate::types::{Order, OrderType, Strategy, TradeSide, TradeStatus};
use crate::venues::ExchangeClient;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeQuery {
    #[serde(alias = "bot_id")]
    pub bot_id: Option<String>,
    pub symbol: Option<String>,
    pub status: Option<String>,
    pub strategy: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TradeQuery {
    fn into_filter(self, user_id: &str) -> Result<TradeFilter> {
        let mut filter = TradeFilter::for_user(user_id).page(
            self.limit.unwrap_or(DEFAULT_TRADE_LIMIT),
            self.offset.unwrap_or(0),
        );
        filter.bot_id = self.bot_id.filter(|b| !b.is_empty());
        filter.symbol = self.symbol.filter(|s| !s.is_empty());
        filter.status = self.status.as_deref().map(str::parse).transpose()?;
        filter.strategy = self.strategy.as_deref().map(str::parse).transpose()?;
        Ok(filter)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTradeRequest {
    pub exit_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: TradeSide,
    /// Sized from the account balance and risk settings when omitted
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    pub bot_id: Option<String>,
    pub strategy: Option<Strategy>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

fn default_order_type() -> OrderType {
    OrderType::Market
}

/// Stop distance assumed for sizing when no bot supplies one
const DEFAULT_STOP_LOSS_PERCENTAGE: f64 = 2.5;

/// Base quantity that risks `risk_percentage` of the free quote balance on a
/// stop `stop_loss_percentage` away
async fn size_order(
    exchange: &dyn ExchangeClient,
    symbol: &str,
    price: Option<f64>,
    risk_percentage: f64,
    stop_loss_percentage: f64,
) -> Result<f64> {
    let info = exchange.symbol_info(symbol).await?;
    let free = exchange
        .account_balances()
        .await?
        .iter()
        .find(|b| b.asset == info.quote_asset)
        .map_or(0.0, |b| b.free);
    let price = match price {
        Some(p) if p > 0.0 => p,
        _ => exchange.current_price(symbol).await?,
    };

    let value = position_size(free, risk_percentage / 100.0, stop_loss_percentage / 100.0);
    if value <= 0.0 || price <= 0.0 {
        return Err(AppError::validation("Insufficient balance to size the order"));
    }
    debug!(symbol = %symbol, balance = free, value = value, "Order sized from balance");
    Ok(value / price)
}

async fn load_trade(services: &Services, id: &str, user_id: &str) -> Result<Trade> {
    services
        .trades
        .find_for_user(id, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Trade not found"))
}

async fn load_bot(services: &Services, id: &str, user_id: &str) -> Result<Bot> {
    services
        .bots
        .find_for_user(id, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Bot not found"))
}

async fn persist_new_trade(services: &Services, trade: &Trade) -> Result<()> {
    services.trades.create(trade).await?;
    TRADES_RECORDED
        .with_label_values(&[trade.strategy.as_str(), trade.side.as_str()])
        .inc();
    services
        .hub
        .emit_to_user(&trade.user_id, TRADE_UPDATE, trade)
        .await;
    Ok(())
}

async fn list_trades(ctx: AuthContext, query: TradeQuery, services: Services) -> ApiResult {
    let filter = query.into_filter(&ctx.user.id)?;
    let trades = services.trades.list(&filter).await?;
    let total = services.trades.count(&filter).await?;

    Ok(ok(json!({
        "trades": trades,
        "pagination": {
            "total": total,
            "limit": filter.limit,
            "offset": filter.offset,
        },
    })))
}

async fn get_trade(id: String, ctx: AuthContext, services: Services) -> ApiResult {
    let trade = load_trade(&services, &id, &ctx.user.id).await?;
    Ok(ok(trade))
}

async fn record_trade(ctx: AuthContext, req: NewTradeRequest, services: Services) -> ApiResult {
    if let Some(bot_id) = req.bot_id.as_deref().filter(|b| !b.is_empty()) {
        load_bot(&services, bot_id, &ctx.user.id).await?;
    }
    let trade = Trade::record(&ctx.user.id, req)?;
    persist_new_trade(&services, &trade).await?;

    info!(trade_id = %trade.id, symbol = %trade.symbol, side = %trade.side, "Trade recorded");
    Ok(created(trade, "Trade recorded successfully"))
}

/// Realises the trade's P&L and folds it into its bot's performance
async fn close_trade(
    id: String,
    ctx: AuthContext,
    req: CloseTradeRequest,
    services: Services,
) -> ApiResult {
    let mut trade = load_trade(&services, &id, &ctx.user.id).await?;
    let pnl = trade.close(req.exit_price)?;
    let bot = services.trades.close_position(&trade).await?;
    info!(trade_id = %trade.id, pnl = pnl, "Trade closed");

    if let Some(bot) = &bot {
        services.hub.emit_to_user(&ctx.user.id, BOT_UPDATE, bot).await;
    }
    services
        .hub
        .emit_to_user(&ctx.user.id, TRADE_UPDATE, &trade)
        .await;
    Ok(ok_with_message(trade, "Trade closed successfully"))
}

async fn place_order(ctx: AuthContext, req: PlaceOrderRequest, services: Services) -> ApiResult {
    let bot = match req.bot_id.as_deref().filter(|b| !b.is_empty()) {
        Some(bot_id) => Some(load_bot(&services, bot_id, &ctx.user.id).await?),
        None => None,
    };
    let symbol = req.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(AppError::validation("Missing required fields").into());
    }

    let exchange = services.exchange_for(&ctx.user);
    let quantity = match req.quantity {
        Some(quantity) => quantity,
        None => {
            let (risk, stop) = match &bot {
                Some(bot) => (
                    bot.settings.risk_percentage,
                    bot.settings.stop_loss_percentage,
                ),
                None => (
                    ctx.user.trading_settings.risk_percentage,
                    DEFAULT_STOP_LOSS_PERCENTAGE,
                ),
            };
            size_order(exchange.as_ref(), &symbol, req.price, risk, stop).await?
        }
    };
    let quantity = exchange.round_quantity(&symbol, quantity).await;
    let order = Order {
        symbol,
        side: req.side,
        quantity,
        price: req.price,
        order_type: req.order_type,
    };
    let placed = exchange.place_order(&order).await?;

    let strategy = bot
        .as_ref()
        .map(|b| b.strategy)
        .or(req.strategy)
        .unwrap_or(ctx.user.trading_settings.preferred_strategy);
    let mut trade = Trade::from_exchange_order(
        &ctx.user.id,
        bot.as_ref().map(|b| b.id.clone()),
        strategy,
        &placed,
        req.price,
    );

    match &bot {
        Some(bot) => {
            let settings = &bot.settings;
            trade.stop_loss = req.stop_loss.or(Some(stop_loss_price(
                trade.price,
                trade.side,
                settings.stop_loss_percentage / 100.0,
            )));
            trade.take_profit = req.take_profit.or(Some(take_profit_price(
                trade.price,
                trade.side,
                settings.take_profit_percentage / 100.0,
            )));
            trade.metadata.risk_percentage = settings.risk_percentage;
        }
        None => {
            trade.stop_loss = req.stop_loss;
            trade.take_profit = req.take_profit;
            trade.metadata.risk_percentage = ctx.user.trading_settings.risk_percentage;
        }
    }

    persist_new_trade(&services, &trade).await?;
    info!(
        trade_id = %trade.id,
        order_id = %trade.order_id,
        symbol = %trade.symbol,
        status = %trade.status,
        "Order placed"
    );
    Ok(created(trade, "Order placed successfully"))
}

async fn cancel_order(id: String, ctx: AuthContext, services: Services) -> ApiResult {
    let mut trade = load_trade(&services, &id, &ctx.user.id).await?;
    if trade.status != TradeStatus::Pending {
        return Err(AppError::validation("Only pending trades can be cancelled").into());
    }

    if !trade.is_manual() {
        services
            .exchange_for(&ctx.user)
            .cancel_order(&trade.symbol, &trade.order_id)
            .await?;
    }
    trade.mark_cancelled()?;
    services.trades.update(&trade).await?;
    info!(trade_id = %trade.id, order_id = %trade.order_id, "Order cancelled");

    services
        .hub
        .emit_to_user(&ctx.user.id, TRADE_UPDATE, &trade)
        .await;
    Ok(ok_with_message(trade, "Order cancelled successfully"))
}

pub fn routes(services: Services) -> BoxedFilter<(Response,)> {
    let auth = with_auth(services.clone());
    let svc = with_services(services);

    let list = warp::path!("api" / "trades")
        .and(warp::get())
        .and(auth.clone())
        .and(warp::query::<TradeQuery>())
        .and(svc.clone())
        .and_then(list_trades);

    let record = warp::path!("api" / "trades")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(svc.clone())
        .and_then(record_trade);

    let place = warp::path!("api" / "trades" / "orders")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(svc.clone())
        .and_then(place_order);

    let get = warp::path!("api" / "trades" / String)
        .and(warp::get())
        .and(auth.clone())
        .and(svc.clone())
        .and_then(get_trade);

    let close = warp::path!("api" / "trades" / String / "close")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(svc.clone())
        .and_then(close_trade);

    let cancel = warp::path!("api" / "trades" / String / "order")
        .and(warp::delete())
        .and(auth)
        .and(svc)
        .and_then(cancel_order);

    list.or(record)
        .unify()
        .or(place)
        .unify()
        .or(get)
        .unify()
        .or(close)
        .unify()
        .or(cancel)
        .unify()
        .boxed()
}
