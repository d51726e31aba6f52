use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
};
use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder};
use tracing::info;
use warp::Filter;

lazy_static! {
    // HTTP API metrics
    pub static ref HTTP_REQUESTS: CounterVec = register_counter_vec!(
        "trade_bionic_http_requests_total",
        "Total number of HTTP requests served",
        &["method", "status"]
    ).unwrap();

    pub static ref HTTP_LATENCY: HistogramVec = register_histogram_vec!(
        "trade_bionic_http_latency_seconds",
        "HTTP request latency in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    ).unwrap();

    // Exchange client metrics
    pub static ref EXCHANGE_REQUESTS: CounterVec = register_counter_vec!(
        "trade_bionic_exchange_requests_total",
        "Total number of exchange REST calls",
        &["endpoint", "outcome"]
    ).unwrap();

    pub static ref EXCHANGE_LATENCY: HistogramVec = register_histogram_vec!(
        "trade_bionic_exchange_latency_seconds",
        "Exchange REST call latency in seconds",
        &["endpoint"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // Venue metrics
    pub static ref VENUE_CONNECTIONS: GaugeVec = register_gauge_vec!(
        "trade_bionic_venue_connections",
        "Ticker stream status for venues (1=connected, 0=disconnected)",
        &["venue"]
    ).unwrap();

    // Realtime channel metrics
    pub static ref REALTIME_CONNECTIONS: Gauge = register_gauge!(
        "trade_bionic_realtime_connections",
        "Number of open realtime client connections"
    ).unwrap();

    pub static ref REALTIME_EVENTS: CounterVec = register_counter_vec!(
        "trade_bionic_realtime_events_total",
        "Total number of events pushed to realtime clients",
        &["event"]
    ).unwrap();

    pub static ref REALTIME_DROPPED: CounterVec = register_counter_vec!(
        "trade_bionic_realtime_dropped_total",
        "Events dropped because a client's outbound queue was full",
        &["event"]
    ).unwrap();

    // Trading metrics
    pub static ref TRADES_RECORDED: CounterVec = register_counter_vec!(
        "trade_bionic_trades_total",
        "Total number of trades recorded",
        &["strategy", "side"]
    ).unwrap();
}

fn render() -> (String, String) {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    (
        String::from_utf8_lossy(&buffer).into_owned(),
        encoder.format_type().to_string(),
    )
}

async fn metrics_handler() -> Result<impl warp::Reply, warp::Rejection> {
    let (body, content_type) = render();
    Ok(warp::reply::with_header(body, "content-type", content_type))
}

pub fn routes() -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(metrics_handler)
}

/// Serve `/metrics` on its own port. A port of 0 disables the server.
pub async fn init_metrics_server(port: u16) {
    if port == 0 {
        info!("Metrics server disabled");
        return;
    }

    info!(port = port, "Starting metrics server");

    tokio::spawn(warp::serve(routes()).run(([0, 0, 0, 0], port)));
}
