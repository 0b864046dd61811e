use crate::error::MonitorError;
use crate::monitoring::alerts::CustomAlertRequest;
use crate::monitoring::system::SystemMonitor;

use actix_web::http::StatusCode;
use actix_web::{App, HttpResponse, HttpServer, ResponseError, web};
use log::{debug, info};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared state handed to every handler.
///
/// # Examples
/// ```no_run
/// use std::sync::Arc;
/// use tradewatch::config::MonitorConfig;
/// use tradewatch::monitoring::SystemMonitor;
/// use tradewatch::web_console::AppState;
///
/// # async fn build() -> Result<(), Box<dyn std::error::Error>> {
/// let monitor = Arc::new(SystemMonitor::new(MonitorConfig::default()).await?);
/// let state = AppState { monitor };
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AppState {
    /// The coordinator every endpoint reads from or commands.
    pub monitor: Arc<SystemMonitor>,
}

impl ResponseError for MonitorError {
    fn status_code(&self) -> StatusCode {
        match self {
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::InvalidTransition { .. } => StatusCode::CONFLICT,
            MonitorError::Configuration(_)
            | MonitorError::DuplicateMetric { .. }
            | MonitorError::UnknownMetric(_)
            | MonitorError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

/// Body of `POST /alerts/{id}/acknowledge`
#[derive(Deserialize)]
pub struct AcknowledgeRequest {
    pub actor: String,
}

/// Optional body of `POST /alerts/{id}/resolve`
#[derive(Deserialize)]
pub struct ResolveRequest {
    pub actor: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

fn parse_alert_id(raw: &str) -> Result<Uuid, MonitorError> {
    Uuid::parse_str(raw).map_err(|_| MonitorError::NotFound(format!("alert {}", raw)))
}

/// Overall health, open alert counts by severity and uptime.
async fn system_status(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.monitor.get_system_status().await)
}

/// Cached status of every registered component.
async fn health_statuses(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.monitor.get_health().await)
}

/// Runs every probe now and returns the fresh results.
async fn force_health_check(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.monitor.force_health_check().await)
}

/// Current metric registry snapshot.
async fn performance(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.monitor.get_performance())
}

async fn active_alerts(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.monitor.get_active_alerts().await)
}

/// Resolved alerts, newest first; `?limit=n` caps the list.
async fn alert_history(query: web::Query<HistoryQuery>, data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.monitor.alert_history(query.limit).await)
}

/// Raises an operator alert.
///
/// # Returns
/// * `201 Created` with the alert when a new alert was opened.
/// * `200 OK` with the existing alert when an open alert already covers the same scope.
/// * `400 Bad Request` when the title is empty.
async fn create_alert(
    info: web::Json<CustomAlertRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, MonitorError> {
    let alert = data.monitor.create_custom_alert(info.into_inner()).await?;
    if alert.fire_count == 1 {
        Ok(HttpResponse::Created().json(alert))
    } else {
        Ok(HttpResponse::Ok().json(alert))
    }
}

/// Acknowledges an open alert.
///
/// # Returns
/// * `404 Not Found` for an unknown id.
/// * `409 Conflict` when the alert is already resolved.
async fn acknowledge_alert(
    path: web::Path<String>,
    info: web::Json<AcknowledgeRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, MonitorError> {
    let id = parse_alert_id(&path)?;
    let alert = data.monitor.acknowledge_alert(id, &info.actor).await?;
    debug!("Alert {} acknowledged by {}", id, info.actor);
    Ok(HttpResponse::Ok().json(alert))
}

/// Resolves an alert; resolving a resolved alert returns it unchanged.
async fn resolve_alert(
    path: web::Path<String>,
    info: Option<web::Json<ResolveRequest>>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, MonitorError> {
    let id = parse_alert_id(&path)?;
    let actor = info.and_then(|body| body.into_inner().actor);
    let alert = data.monitor.resolve_alert_by(id, actor.as_deref()).await?;
    Ok(HttpResponse::Ok().json(alert))
}

/// Prometheus text exposition of the metric registry.
async fn metrics(data: web::Data<AppState>) -> Result<HttpResponse, MonitorError> {
    let body = data.monitor.get_performance().to_prometheus_text()?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

/// Registers every console endpoint.
///
/// | Function               | Type  | Endpoint                     | Description                                   |
/// |------------------------|-------|------------------------------|-----------------------------------------------|
/// | [`system_status`]      | GET   | `/status`                    | Overall health, alert counts and uptime.      |
/// | [`health_statuses`]    | GET   | `/health`                    | Cached component health.                      |
/// | [`force_health_check`] | POST  | `/health/check`              | Runs every probe and returns the results.     |
/// | [`performance`]        | GET   | `/performance`               | Metric registry snapshot.                     |
/// | [`active_alerts`]      | GET   | `/alerts`                    | Open alerts.                                  |
/// | [`create_alert`]       | POST  | `/alerts`                    | Raises an operator alert.                     |
/// | [`alert_history`]      | GET   | `/alerts/history`            | Resolved alerts, newest first.                |
/// | [`acknowledge_alert`]  | POST  | `/alerts/{id}/acknowledge`   | Acknowledges an open alert.                   |
/// | [`resolve_alert`]      | POST  | `/alerts/{id}/resolve`       | Resolves an alert.                            |
/// | [`metrics`]            | GET   | `/metrics`                   | Prometheus text exposition.                   |
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(system_status))
        .route("/health", web::get().to(health_statuses))
        .route("/health/check", web::post().to(force_health_check))
        .route("/performance", web::get().to(performance))
        .route("/alerts", web::get().to(active_alerts))
        .route("/alerts", web::post().to(create_alert))
        .route("/alerts/history", web::get().to(alert_history))
        .route("/alerts/{id}/acknowledge", web::post().to(acknowledge_alert))
        .route("/alerts/{id}/resolve", web::post().to(resolve_alert))
        .route("/metrics", web::get().to(metrics));
}

/// Serves the console for `monitor` on `host:port` until the server stops.
///
/// OS signals are not handled here; the caller owns shutdown.
pub async fn run_server(monitor: Arc<SystemMonitor>, host: &str, port: u16) -> std::io::Result<()> {
    let state = AppState { monitor };
    info!("🌐 Web console listening on http://{}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(routes)
    })
    .disable_signals()
    .bind((host, port))?
    .run()
    .await
}
