//! HTTP API acceptance tests
//! Exercise the router in-process with `tower::ServiceExt::oneshot`.

use std::path::PathBuf;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use strategy_lab::config::AppConfig;
use strategy_lab::service::BacktestService;
use strategy_lab::web::{router, AppState};
use strategy_lab_core::Candle;
use tower::ServiceExt;

const JAN_1_2024: i64 = 1_704_067_200_000;
const DAY: i64 = 86_400_000;

const CROSSOVER: &str = r#"
    fn strategy(data) {
        let closes = closes(data);
        let fast = sma(closes, 2);
        let slow = sma(closes, 3);
        let out = [];
        for i in 0..data.len() {
            if i < 3 {
                out.push("hold");
            } else if fast[i] > slow[i] && fast[i - 1] <= slow[i - 1] {
                out.push("buy");
            } else if fast[i] < slow[i] && fast[i - 1] >= slow[i - 1] {
                out.push("sell");
            } else {
                out.push("hold");
            }
        }
        out
    }
"#;

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("strategy-lab-api-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let candles: Vec<Candle> = [100.0, 101.0, 99.0, 103.0, 108.0, 104.0, 98.0, 97.0]
        .iter()
        .enumerate()
        .map(|(i, &c)| Candle::flat(JAN_1_2024 + i as i64 * DAY, c))
        .collect();
    std::fs::write(
        dir.join("AAPL_1d.json"),
        serde_json::to_vec(&candles).unwrap(),
    )
    .unwrap();
    dir
}

fn app() -> Router {
    let mut config = AppConfig::default();
    config.market_data.data_dir = data_dir();
    let state = AppState::new(BacktestService::from_config(&config), None);
    router(state, config.server.max_payload_size)
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}

fn inline_request(code: &str) -> Value {
    json!({
        "strategyCode": code,
        "data": [
            { "timestamp": 0, "open": 100.0, "high": 100.0, "low": 100.0, "close": 100.0, "volume": 0.0 },
            { "timestamp": DAY, "open": 110.0, "high": 110.0, "low": 110.0, "close": 110.0, "volume": 0.0 },
            { "timestamp": 2 * DAY, "open": 105.0, "high": 105.0, "low": 105.0, "close": 105.0, "volume": 0.0 }
        ],
        "initialCapital": 10000.0
    })
}

/// Given: a running router
/// When: probing /health and /metrics
/// Then: both answer 200 even without a metrics recorder
#[tokio::test]
async fn health_and_metrics_respond() {
    let (status, body) = send(app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = send(app(), "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}

/// Given: strategy code importing `fs`
/// When: posting it to the validate endpoint
/// Then: the result is invalid and names the module
#[tokio::test]
async fn validate_endpoint_reports_findings() {
    let (status, body) = send(
        app(),
        "POST",
        "/api/strategies/validate",
        Some(json!({ "code": "import \"fs\" as fs; fn strategy(data) { [] }" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isValid"], false);
    assert!(body["errors"][0].as_str().unwrap().contains("fs"));

    let (_, body) = send(
        app(),
        "POST",
        "/api/strategies/validate",
        Some(json!({ "code": CROSSOVER })),
    )
    .await;
    assert_eq!(body["isValid"], true);
}

/// Given: the reference three-candle request
/// When: running it inline
/// Then: one losing trade comes back with camelCase series
#[tokio::test]
async fn inline_backtest_returns_full_result() {
    let code = r#"fn strategy(data) { ["hold", "buy", "sell"] }"#;
    let (status, body) = send(app(), "POST", "/api/backtests/run", Some(inline_request(code))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tradeLog"].as_array().unwrap().len(), 1);
    assert!(body["tradeLog"][0]["pnl"].as_f64().unwrap() < 0.0);
    assert_eq!(body["equityCurve"].as_array().unwrap().len(), 3);
    assert_eq!(body["drawdownSeries"].as_array().unwrap().len(), 3);
    assert!(body["returnsSeries"][0].get("return").is_some());
    assert_eq!(body["summaryStats"]["totalTrades"], 1);
    assert_eq!(body["execution"]["state"], "completed");
}

/// Given: strategy code calling `eval`
/// When: running it inline
/// Then: the request is refused with a structured validation error
#[tokio::test]
async fn inline_backtest_rejects_invalid_code() {
    let code = r#"fn strategy(data) { eval("[]") }"#;
    let (status, body) = send(app(), "POST", "/api/backtests/run", Some(inline_request(code))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(!body["error"]["details"]["errors"]
        .as_array()
        .unwrap()
        .is_empty());
}

/// Given: a request with no candles
/// When: running it inline
/// Then: the request is refused as a market data error
#[tokio::test]
async fn inline_backtest_rejects_empty_data() {
    let request = json!({ "strategyCode": CROSSOVER, "data": [] });
    let (status, body) = send(app(), "POST", "/api/backtests/run", Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MARKET_DATA_ERROR");
}

/// Given: candles on disk for AAPL
/// When: creating a backtest and reading it back
/// Then: the run is stored, listed and retrievable by id
#[tokio::test]
async fn stored_backtests_round_trip() {
    let app = app();
    let params = json!({
        "strategyCode": CROSSOVER,
        "assets": ["AAPL"],
        "startDate": "2024-01-01",
        "endDate": "2024-01-31",
        "timeframe": "1d",
        "strategyId": "crossover-1"
    });
    let (status, created) = send(app.clone(), "POST", "/api/backtests", Some(params)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "completed");
    assert_eq!(
        created["result"]["equityCurve"].as_array().unwrap().len(),
        8
    );

    let id = created["id"].as_str().unwrap().to_string();
    let (status, fetched) = send(app.clone(), "GET", &format!("/api/backtests/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["strategyId"], "crossover-1");

    let (status, listed) = send(app, "GET", "/api/backtests", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], id.as_str());
}

/// Given: a request without assets and an unknown id
/// When: creating and fetching backtests
/// Then: the failure is a 400, it is still recorded, and the unknown id is a 404
#[tokio::test]
async fn failed_backtests_are_recorded() {
    let app = app();
    let params = json!({
        "strategyCode": CROSSOVER,
        "assets": [],
        "startDate": "2024-01-01",
        "endDate": "2024-01-31"
    });
    let (status, body) = send(app.clone(), "POST", "/api/backtests", Some(params)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (_, listed) = send(app.clone(), "GET", "/api/backtests", None).await;
    assert_eq!(listed[0]["status"], "failed");

    let missing = uuid::Uuid::new_v4();
    let (status, _) = send(app, "GET", &format!("/api/backtests/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
