//! Request handlers for the telemetry API.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::error::{Error, Result};
use crate::service::TelemetryService;

/// Query string of `GET /api/telemetry/recent`.
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    /// Maximum number of sessions; the configured default when absent.
    pub limit: Option<usize>,
}

/// Log a failed operation and attach its name to the error.
fn failed(operation: &'static str) -> impl FnOnce(Error) -> Error {
    move |err| {
        if !err.is_client_error() {
            error!("Error while trying to {}: {}", operation, err);
        }
        err.during(operation)
    }
}

/// `GET /`
pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Welcome to the telehub telemetry API",
        "endpoints": "/api/telemetry",
    }))
}

/// `GET /health`
pub async fn health(service: web::Data<TelemetryService>) -> Result<HttpResponse> {
    let stats = service
        .storage_stats()
        .await
        .map_err(failed("check storage health"))?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "events": stats.total_events,
    })))
}

/// `OPTIONS` on any path: CORS preflight.
pub async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

/// `POST /api/telemetry`
pub async fn receive_telemetry(
    service: web::Data<TelemetryService>,
    body: web::Json<Value>,
) -> Result<HttpResponse> {
    let Value::Object(payload) = body.into_inner() else {
        return Err(Error::invalid_event("payload must be a JSON object"));
    };

    let id = service
        .record(payload)
        .await
        .map_err(failed("process telemetry data"))?;

    Ok(HttpResponse::Created().json(json!({
        "status": "success",
        "id": id,
    })))
}

/// `GET /api/telemetry/stats`
pub async fn get_stats(service: web::Data<TelemetryService>) -> Result<HttpResponse> {
    let stats = service
        .stats()
        .await
        .map_err(failed("generate telemetry statistics"))?;
    Ok(HttpResponse::Ok().json(stats))
}

/// `GET /api/telemetry/sessions/{session_id}/events`
pub async fn get_session_events(
    service: web::Data<TelemetryService>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let session_id = path.into_inner();
    let events = service
        .session_events(&session_id)
        .await
        .map_err(failed("retrieve session events"))?;

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "events": events,
    })))
}

/// `GET /api/telemetry/recent`
pub async fn get_recent_sessions(
    service: web::Data<TelemetryService>,
    query: web::Query<RecentQuery>,
) -> Result<HttpResponse> {
    let sessions = service
        .recent(query.limit)
        .await
        .map_err(failed("retrieve recent sessions"))?;
    Ok(HttpResponse::Ok().json(sessions))
}

/// `GET /api/telemetry/anomalies`
pub async fn get_anomalies(service: web::Data<TelemetryService>) -> Result<HttpResponse> {
    let anomalies = service
        .anomalies()
        .await
        .map_err(failed("detect anomalies"))?;
    Ok(HttpResponse::Ok().json(json!({ "anomalies": anomalies })))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};

    use super::*;
    use crate::api::{configure, cors_headers};
    use crate::config::AnalyticsConfig;
    use crate::storage::Storage;

    fn test_service() -> TelemetryService {
        TelemetryService::new(
            Storage::open_in_memory().unwrap(),
            AnalyticsConfig::default(),
        )
    }

    macro_rules! test_app {
        ($service:expr) => {
            test::init_service(
                App::new()
                    .wrap(cors_headers())
                    .app_data(web::Data::new($service))
                    .configure(configure),
            )
            .await
        };
    }

    fn event(session: &str, step: &str, status: &str) -> Value {
        json!({
            "anonymousId": "anon-1",
            "sessionId": session,
            "step": step,
            "status": status,
            "osName": "Ubuntu",
            "osVersion": "22.04",
        })
    }

    #[actix_web::test]
    async fn test_root() {
        let app = test_app!(test_service());

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert!(body["message"].as_str().unwrap().contains("telemetry"));
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test_app!(test_service());

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["events"], 0);
    }

    #[actix_web::test]
    async fn test_post_telemetry_created() {
        let app = test_app!(test_service());

        let req = test::TestRequest::post()
            .uri("/api/telemetry")
            .set_json(event("s1", "install", "started"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "success");
        assert!(body["id"].is_string());
    }

    #[actix_web::test]
    async fn test_post_telemetry_without_content_type() {
        let app = test_app!(test_service());

        let req = test::TestRequest::post()
            .uri("/api/telemetry")
            .set_payload(event("s1", "install", "started").to_string())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn test_post_telemetry_trailing_slash() {
        let app = test_app!(test_service());

        let req = test::TestRequest::post()
            .uri("/api/telemetry/")
            .set_json(event("s1", "install", "started"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn test_post_telemetry_missing_fields() {
        let app = test_app!(test_service());

        let req = test::TestRequest::post()
            .uri("/api/telemetry")
            .set_json(json!({"sessionId": "s1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert!(body["detail"].as_str().unwrap().contains("invalid telemetry event"));
    }

    #[actix_web::test]
    async fn test_post_telemetry_not_an_object() {
        let app = test_app!(test_service());

        let req = test::TestRequest::post()
            .uri("/api/telemetry")
            .set_json(json!([1, 2, 3]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_post_telemetry_malformed_json() {
        let app = test_app!(test_service());

        let req = test::TestRequest::post()
            .uri("/api/telemetry")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert!(body["detail"].is_string());
    }

    #[actix_web::test]
    async fn test_session_events_round_trip() {
        let app = test_app!(test_service());

        for (step, status) in [("download", "started"), ("download", "completed")] {
            let req = test::TestRequest::post()
                .uri("/api/telemetry")
                .set_json(event("session-42", step, status))
                .to_request();
            test::call_service(&app, req).await;
        }

        let req = test::TestRequest::get()
            .uri("/api/telemetry/sessions/session-42/events")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["session_id"], "session-42");
        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["status"], "started");
        assert_eq!(events[1]["sessionId"], "session-42");
    }

    #[actix_web::test]
    async fn test_session_events_not_found() {
        let app = test_app!(test_service());

        let req = test::TestRequest::get()
            .uri("/api/telemetry/sessions/missing/events")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "Session with ID missing not found");
    }

    #[actix_web::test]
    async fn test_stats_shape() {
        let app = test_app!(test_service());

        let mut completed = event("s1", "install", "completed");
        completed["metrics"] = json!({"success": true});
        let req = test::TestRequest::post()
            .uri("/api/telemetry")
            .set_json(completed)
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get()
            .uri("/api/telemetry/stats")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["total_sessions"], 1);
        assert_eq!(body["successful_installs"], 1);
        assert_eq!(body["success_rate"], 100.0);
        assert_eq!(body["installation_by_os"]["Ubuntu"], 1);
        assert_eq!(body["steps_status"]["install"]["completed"], 1);
    }

    #[actix_web::test]
    async fn test_recent_with_limit() {
        let app = test_app!(test_service());

        for session in ["a", "b", "c"] {
            let req = test::TestRequest::post()
                .uri("/api/telemetry")
                .set_json(event(session, "install", "started"))
                .to_request();
            test::call_service(&app, req).await;
        }

        let req = test::TestRequest::get()
            .uri("/api/telemetry/recent?limit=2")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[actix_web::test]
    async fn test_recent_with_bad_limit() {
        let app = test_app!(test_service());

        let req = test::TestRequest::get()
            .uri("/api/telemetry/recent?limit=abc")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("invalid request:"));
    }

    #[actix_web::test]
    async fn test_anomalies_empty() {
        let app = test_app!(test_service());

        let req = test::TestRequest::get()
            .uri("/api/telemetry/anomalies")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"anomalies": []}));
    }

    #[actix_web::test]
    async fn test_preflight() {
        let app = test_app!(test_service());

        let req = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/api/telemetry")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp
            .headers()
            .contains_key("Access-Control-Allow-Methods"));
    }
}
