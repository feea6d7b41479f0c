//! HTTP server setup for the telemetry API.

use actix_web::{dev::Server, middleware::Logger, web, App, HttpServer};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::service::TelemetryService;

use super::{configure, cors_headers};

/// Creates and binds the API server.
///
/// The returned [`Server`] must be awaited to run.
///
/// # Errors
///
/// Returns an error if the listen address cannot be bound.
pub fn api_server(service: TelemetryService, config: &ServerConfig) -> Result<Server> {
    let data = web::Data::new(service);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors_headers())
            .app_data(data.clone())
            .configure(configure)
    });
    if config.workers > 0 {
        server = server.workers(config.workers);
    }

    let server = server.bind((config.host.as_str(), config.port))?.run();
    info!("Telemetry API listening on {}:{}", config.host, config.port);
    Ok(server)
}
