use chrono::Utc;
use serde::Serialize;
use tracing::info;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::Filter;

use crate::api::{json_body, ok, ok_with_message, with_auth, with_services};
use crate::api::{ApiResult, AuthContext};
use crate::models::user::{ApiKeysUpdate, ProfileUpdate};
use crate::performance::{PeriodProfit, TradeStats};
use crate::services::Services;
use crate::store::TradeFilter;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserStats {
    #[serde(flatten)]
    trades: TradeStats,
    #[serde(flatten)]
    periods: PeriodProfit,
    active_bots: usize,
    total_bots: usize,
}

async fn get_profile(ctx: AuthContext) -> ApiResult {
    Ok(ok(ctx.user))
}

async fn update_profile(ctx: AuthContext, update: ProfileUpdate, services: Services) -> ApiResult {
    let mut user = ctx.user;
    user.apply_profile(update)?;
    services.users.update(&user).await?;
    info!(user_id = %user.id, "Profile updated");
    Ok(ok_with_message(user, "Profile updated successfully"))
}

async fn update_api_keys(ctx: AuthContext, update: ApiKeysUpdate, services: Services) -> ApiResult {
    let mut user = ctx.user;
    let exchange = update.exchange;
    user.set_api_keys(update)?;
    services.users.update(&user).await?;
    info!(user_id = %user.id, exchange = %exchange, "API keys updated");
    Ok(ok_with_message(user, "API keys updated successfully"))
}

async fn balance(ctx: AuthContext, services: Services) -> ApiResult {
    let balances = services.exchange_for(&ctx.user).account_balances().await?;
    Ok(ok(balances))
}

async fn stats(ctx: AuthContext, services: Services) -> ApiResult {
    let trades = services
        .trades
        .list_all(&TradeFilter::for_user(&ctx.user.id))
        .await?;
    let bots = services.bots.list_for_user(&ctx.user.id).await?;

    Ok(ok(UserStats {
        trades: TradeStats::from_trades(&trades),
        periods: PeriodProfit::from_trades(&trades, Utc::now()),
        active_bots: bots.iter().filter(|b| b.is_active).count(),
        total_bots: bots.len(),
    }))
}

pub fn routes(services: Services) -> BoxedFilter<(Response,)> {
    let get_profile = warp::path!("api" / "users" / "profile")
        .and(warp::get())
        .and(with_auth(services.clone()))
        .and_then(get_profile);

    let update_profile = warp::path!("api" / "users" / "profile")
        .and(warp::put())
        .and(with_auth(services.clone()))
        .and(json_body())
        .and(with_services(services.clone()))
        .and_then(update_profile);

    let update_api_keys = warp::path!("api" / "users" / "api-keys")
        .and(warp::put())
        .and(with_auth(services.clone()))
        .and(json_body())
        .and(with_services(services.clone()))
        .and_then(update_api_keys);

    let balance = warp::path!("api" / "users" / "balance")
        .and(warp::get())
        .and(with_auth(services.clone()))
        .and(with_services(services.clone()))
        .and_then(balance);

    let stats = warp::path!("api" / "users" / "stats")
        .and(warp::get())
        .and(with_auth(services.clone()))
        .and(with_services(services))
        .and_then(stats);

    get_profile
        .or(update_profile)
        .unify()
        .or(update_api_keys)
        .unify()
        .or(balance)
        .unify()
        .or(stats)
        .unify()
        .boxed()
}
