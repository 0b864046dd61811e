use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use serde_json::{Value, json};
use tradewatch::clock::ManualClock;
use tradewatch::config::MonitorConfig;
use tradewatch::monitoring::{Alert, ResourceSample, StaticSampler, SystemMonitor, TradeSide};
use tradewatch::web_console::{AppState, routes};

async fn monitor(cpu: f64) -> Arc<SystemMonitor> {
    let sampler = StaticSampler::new(ResourceSample {
        cpu_percent: cpu,
        memory_percent: 50.0,
        disk_percent: 40.0,
        network_rx_bytes: 10_000,
        network_tx_bytes: 20_000,
    });
    let monitor = SystemMonitor::with_parts(
        MonitorConfig::default(),
        Arc::new(ManualClock::new()),
        Arc::new(sampler),
    )
    .await
    .unwrap();
    Arc::new(monitor)
}

/// Test for the alert lifecycle seen through the console.
///
/// # Purpose
/// A CPU spike detected by the coordinator shows up under `/alerts` and
/// `/status`, and moves to `/alerts/history` once resolved.
///
/// # Steps
/// 1. Sample 95% CPU, run health checks and evaluate rules.
/// 2. Assert `/alerts` lists the critical CPU alert.
/// 3. Assert `/status` reports the critical count.
/// 4. Resolve the alert and assert it appears in the history.
#[actix_rt::test]
async fn test_cpu_alert_lifecycle() {
    let monitor = monitor(95.0).await;
    monitor.sample_now().await.unwrap();
    monitor.force_health_check().await;
    monitor.evaluate_now().await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState {
                monitor: Arc::clone(&monitor),
            }))
            .configure(routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/alerts").to_request();
    let alerts: Vec<Alert> = test::call_and_read_body_json(&app, req).await;
    let cpu = alerts.iter().find(|a| a.rule == "high_cpu_usage").unwrap();
    assert!(cpu.title.contains("CPU"));

    let req = test::TestRequest::get().uri("/status").to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["overall_health"], "critical");
    assert_eq!(status["alerts_by_severity"]["CRITICAL"], alerts.len());

    let req = test::TestRequest::post()
        .uri(&format!("/alerts/{}/resolve", cpu.id))
        .set_json(json!({ "actor": "desk-lead" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get().uri("/alerts/history?limit=5").to_request();
    let history: Vec<Alert> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history[0].id, cpu.id);
}

/// Test for trading metrics exposed over HTTP.
///
/// # Purpose
/// Trade executions and API calls recorded through the performance monitor
/// appear in `/performance` and the Prometheus exposition.
///
/// # Steps
/// 1. Record two trades and one failed API call.
/// 2. Assert the rolling average and counters in `/performance`.
/// 3. Assert `/metrics` carries the counters with the crate prefix.
#[actix_rt::test]
async fn test_trading_metrics_exposed() {
    let monitor = monitor(20.0).await;
    let performance = monitor.performance();
    performance.record_trade_execution("ETH-USD", TradeSide::Buy, 2.0, 3_000.0, 10.0);
    performance.record_trade_execution("ETH-USD", TradeSide::Sell, 1.0, 3_010.0, 30.0);
    performance.record_api_call("/orders", 120.0, 503);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState {
                monitor: Arc::clone(&monitor),
            }))
            .configure(routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/performance").to_request();
    let snapshot: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(snapshot["metrics"]["trade_execution_ms"]["value"], 20.0);
    assert_eq!(snapshot["metrics"]["trades_total"]["value"], 2.0);
    assert_eq!(snapshot["metrics"]["api_error_rate"]["value"], 100.0);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("tradewatch_trades_total 2"));
    assert!(text.contains("tradewatch_api_errors_total 1"));
}

/// Test for input validation on custom alerts.
///
/// # Purpose
/// An empty title is rejected with `400 Bad Request`; a duplicate scope
/// returns the open alert with `200 OK`.
///
/// # Steps
/// 1. Post an alert with an empty title and assert `400`.
/// 2. Post the same alert twice and assert `201` then `200`.
#[actix_rt::test]
async fn test_custom_alert_validation_and_dedup() {
    let monitor = monitor(20.0).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState { monitor }))
            .configure(routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/alerts")
        .set_json(json!({ "title": "  ", "message": "nothing" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = json!({ "title": "Position limit breach", "message": "Desk 4 over limit", "scope": "desk-4" });
    let req = test::TestRequest::post().uri("/alerts").set_json(&body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post().uri("/alerts").set_json(&body).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let alert: Alert = test::read_body_json(resp).await;
    assert_eq!(alert.fire_count, 2);
}
