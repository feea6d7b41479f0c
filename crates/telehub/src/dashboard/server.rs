//! HTTP server for the dashboard page.

use std::sync::Arc;

use actix_web::{
    dev::Server, http::header, middleware::Logger, web, App, HttpResponse, HttpServer,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::config::DashboardConfig;
use crate::error::Result;
use crate::source::TelemetrySource;

use super::render::{render_html, sessions_csv};
use super::report::{build_report, ReportOptions};

/// Shared state of the dashboard server.
#[derive(Clone)]
pub struct DashboardState {
    source: Arc<dyn TelemetrySource>,
    recent_limit: usize,
}

impl std::fmt::Debug for DashboardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardState")
            .field("source", &self.source.describe())
            .field("recent_limit", &self.recent_limit)
            .finish()
    }
}

impl DashboardState {
    /// Create the state for a data source.
    #[must_use]
    pub fn new(source: Arc<dyn TelemetrySource>, recent_limit: usize) -> Self {
        Self {
            source,
            recent_limit,
        }
    }

    fn options(&self, query: &PageQuery, session: Option<String>) -> ReportOptions {
        ReportOptions {
            recent_limit: query.limit.unwrap_or(self.recent_limit),
            session: session.or_else(|| query.session.clone()),
        }
    }
}

/// Query string accepted by the page routes.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// Number of recent sessions.
    pub limit: Option<usize>,
    /// Session to show in detail.
    pub session: Option<String>,
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

async fn index(state: web::Data<DashboardState>, query: web::Query<PageQuery>) -> HttpResponse {
    let report = build_report(state.source.as_ref(), &state.options(&query, None)).await;
    html(render_html(&report))
}

async fn session_page(
    state: web::Data<DashboardState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> HttpResponse {
    let options = state.options(&query, Some(path.into_inner()));
    let report = build_report(state.source.as_ref(), &options).await;
    html(render_html(&report))
}

async fn export_csv(state: web::Data<DashboardState>, query: web::Query<PageQuery>) -> HttpResponse {
    let limit = query.limit.unwrap_or(state.recent_limit);
    match state.source.recent(limit).await {
        Ok(sessions) => HttpResponse::Ok()
            .content_type("text/csv; charset=utf-8")
            .insert_header((
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"telehub_sessions.csv\"",
            ))
            .body(sessions_csv(&sessions)),
        Err(e) => {
            error!("Error exporting sessions: {}", e);
            HttpResponse::BadGateway().json(json!({ "detail": e.to_string() }))
        }
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Register the dashboard routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/health", web::get().to(health))
        .route("/sessions.csv", web::get().to(export_csv))
        .route("/sessions/{session_id}", web::get().to(session_page));
}

/// Creates and binds the dashboard server.
///
/// # Errors
///
/// Returns an error if the listen address cannot be bound.
pub fn dashboard_server(state: DashboardState, config: &DashboardConfig) -> Result<Server> {
    info!("Dashboard reading from {}", state.source.describe());
    let data = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(data.clone())
            .configure(configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run();

    info!("Dashboard listening on {}:{}", config.host, config.port);
    Ok(server)
}
