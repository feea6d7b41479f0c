//! HTTP ingest and analytics API.
//!
//! Routes:
//!
//! | method | path |
//! |---|---|
//! | GET | `/` |
//! | GET | `/health` |
//! | POST | `/api/telemetry` |
//! | GET | `/api/telemetry/stats` |
//! | GET | `/api/telemetry/sessions/{session_id}/events` |
//! | GET | `/api/telemetry/recent?limit=N` |
//! | GET | `/api/telemetry/anomalies` |

pub mod handlers;
pub mod server;

use actix_web::{guard, middleware::DefaultHeaders, web, Scope};

use crate::error::Error;

pub use server::api_server;

/// Routes under `/api/telemetry`.
pub fn routes() -> Scope {
    web::scope("/api/telemetry")
        .route("", web::post().to(handlers::receive_telemetry))
        .route("/", web::post().to(handlers::receive_telemetry))
        .route("/stats", web::get().to(handlers::get_stats))
        .route(
            "/sessions/{session_id}/events",
            web::get().to(handlers::get_session_events),
        )
        .route("/recent", web::get().to(handlers::get_recent_sessions))
        .route("/anomalies", web::get().to(handlers::get_anomalies))
}

/// Register every API route on an app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .service(
            web::resource("/{tail:.*}")
                .guard(guard::Options())
                .to(handlers::preflight),
        )
        .route("/", web::get().to(handlers::root))
        .route("/health", web::get().to(handlers::health))
        .service(routes());
}

/// Permissive CORS headers added to every response.
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "*"))
}

/// Body parsing failures become `400 {"detail": ...}` like every other
/// rejected payload. Installer scripts may omit the `Content-Type` header.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .content_type_required(false)
        .error_handler(|err, _req| Error::invalid_event(err.to_string()).into())
}

/// Malformed query strings get the same JSON error body.
fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| Error::invalid_request(err.to_string()).into())
}
