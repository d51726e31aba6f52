use serde::Deserialize;
use serde_json::json;
use tracing::info;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::Filter;

use crate::api::{created, json_body, message, ok, ok_with_message, with_auth, with_services};
use crate::api::{ApiResult, AuthContext};
use crate::error::{AppError, Result};
use crate::models::{Bot, CreateBotRequest, UpdateBotRequest};
use crate::performance::TradeStats;
use crate::realtime::BOT_UPDATE;
use crate::services::Services;
use crate::store::{TradeFilter, MAX_TRADE_LIMIT};
use crate::strategy::{analyze, ANALYSIS_KLINES};

const STATS_TRADES: i64 = 100;
const RECENT_TRADES: usize = 10;
const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

async fn load_bot(services: &Services, id: &str, user_id: &str) -> Result<Bot> {
    services
        .bots
        .find_for_user(id, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Bot not found"))
}

async fn list_bots(ctx: AuthContext, services: Services) -> ApiResult {
    let bots = services.bots.list_for_user(&ctx.user.id).await?;
    Ok(ok(bots))
}

async fn create_bot(ctx: AuthContext, req: CreateBotRequest, services: Services) -> ApiResult {
    let bot = Bot::create(&ctx.user.id, req)?;
    services.bots.create(&bot).await?;
    info!(bot_id = %bot.id, strategy = %bot.strategy, symbol = %bot.symbol, "Bot created");

    services.hub.emit_to_user(&ctx.user.id, BOT_UPDATE, &bot).await;
    Ok(created(bot, "Bot created successfully"))
}

async fn get_bot(id: String, ctx: AuthContext, services: Services) -> ApiResult {
    let bot = load_bot(&services, &id, &ctx.user.id).await?;
    Ok(ok(bot))
}

async fn update_bot(
    id: String,
    ctx: AuthContext,
    req: UpdateBotRequest,
    services: Services,
) -> ApiResult {
    let mut bot = load_bot(&services, &id, &ctx.user.id).await?;
    bot.apply_update(req)?;
    services.bots.update(&bot).await?;
    info!(bot_id = %bot.id, "Bot updated");

    services.hub.emit_to_user(&ctx.user.id, BOT_UPDATE, &bot).await;
    Ok(ok_with_message(bot, "Bot updated successfully"))
}

async fn delete_bot(id: String, ctx: AuthContext, services: Services) -> ApiResult {
    let bot = load_bot(&services, &id, &ctx.user.id).await?;
    if bot.is_active {
        return Err(AppError::validation("Cannot delete an active bot").into());
    }
    if !services.bots.delete(&bot.id, &ctx.user.id).await? {
        return Err(AppError::not_found("Bot not found").into());
    }
    info!(bot_id = %bot.id, "Bot deleted");
    Ok(message("Bot deleted successfully"))
}

async fn toggle_bot(id: String, ctx: AuthContext, services: Services) -> ApiResult {
    let mut bot = load_bot(&services, &id, &ctx.user.id).await?;
    let is_active = bot.toggle();
    services.bots.update(&bot).await?;
    info!(bot_id = %bot.id, is_active = is_active, "Bot toggled");

    services.hub.emit_to_user(&ctx.user.id, BOT_UPDATE, &bot).await;
    Ok(ok_with_message(
        json!({ "id": bot.id, "isActive": is_active }),
        if is_active { "Bot activated" } else { "Bot deactivated" },
    ))
}

async fn bot_stats(id: String, ctx: AuthContext, services: Services) -> ApiResult {
    let bot = load_bot(&services, &id, &ctx.user.id).await?;
    let trades = services
        .trades
        .list(&TradeFilter::for_bot(&bot).page(STATS_TRADES, 0))
        .await?;

    let stats = TradeStats::from_trades(&trades);
    let recent: Vec<_> = trades.into_iter().take(RECENT_TRADES).collect();
    Ok(ok(json!({
        "bot": bot,
        "trades": stats,
        "recentTrades": recent,
    })))
}

async fn test_bot(id: String, ctx: AuthContext, services: Services) -> ApiResult {
    let bot = load_bot(&services, &id, &ctx.user.id).await?;

    let market = services.exchange.market_data(&bot.symbol).await?;
    let klines = services
        .exchange
        .klines(&bot.symbol, bot.interval, ANALYSIS_KLINES)
        .await?;
    let analysis = analyze(&bot, &market, &klines);

    Ok(ok(json!({
        "bot": bot,
        "analysis": analysis,
        "marketData": market,
    })))
}

async fn bot_trades(
    id: String,
    ctx: AuthContext,
    query: PageQuery,
    services: Services,
) -> ApiResult {
    let bot = load_bot(&services, &id, &ctx.user.id).await?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_TRADE_LIMIT);
    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| AppError::validation("page is out of range"))?;
    let filter = TradeFilter::for_bot(&bot).page(limit, offset);

    let trades = services.trades.list(&filter).await?;
    let total = services.trades.count(&filter).await?;
    let pages = total.div_ceil(limit as u64);

    Ok(ok(json!({
        "trades": trades,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "pages": pages,
        },
    })))
}

pub fn routes(services: Services) -> BoxedFilter<(Response,)> {
    let auth = with_auth(services.clone());
    let svc = with_services(services);

    let list = warp::path!("api" / "bots")
        .and(warp::get())
        .and(auth.clone())
        .and(svc.clone())
        .and_then(list_bots);

    let create = warp::path!("api" / "bots")
        .and(warp::post())
        .and(auth.clone())
        .and(json_body())
        .and(svc.clone())
        .and_then(create_bot);

    let get = warp::path!("api" / "bots" / String)
        .and(warp::get())
        .and(auth.clone())
        .and(svc.clone())
        .and_then(get_bot);

    let update = warp::path!("api" / "bots" / String)
        .and(warp::put())
        .and(auth.clone())
        .and(json_body())
        .and(svc.clone())
        .and_then(update_bot);

    let delete = warp::path!("api" / "bots" / String)
        .and(warp::delete())
        .and(auth.clone())
        .and(svc.clone())
        .and_then(delete_bot);

    let toggle = warp::path!("api" / "bots" / String / "toggle")
        .and(warp::post())
        .and(auth.clone())
        .and(svc.clone())
        .and_then(toggle_bot);

    let stats = warp::path!("api" / "bots" / String / "stats")
        .and(warp::get())
        .and(auth.clone())
        .and(svc.clone())
        .and_then(bot_stats);

    let test = warp::path!("api" / "bots" / String / "test")
        .and(warp::post())
        .and(auth.clone())
        .and(svc.clone())
        .and_then(test_bot);

    let trades = warp::path!("api" / "bots" / String / "trades")
        .and(warp::get())
        .and(auth)
        .and(warp::query::<PageQuery>())
        .and(svc)
        .and_then(bot_trades);

    list.or(create)
        .unify()
        .or(get)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .or(toggle)
        .unify()
        .or(stats)
        .unify()
        .or(test)
        .unify()
        .or(trades)
        .unify()
        .boxed()
}
