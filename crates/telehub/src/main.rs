//! `telehub` - CLI for the installation telemetry service
//!
//! Runs the telemetry API and dashboard servers, and provides maintenance
//! commands for the telemetry database.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing::info;

use telehub::cli::{
    Cli, Command, ConfigCommand, DashboardCommand, DbCommand, OutputFormat, SendTestCommand,
    ServeCommand, ShowCommand,
};
use telehub::client::sample_event;
use telehub::dashboard::{
    build_report, dashboard_server, render_html, render_text, sessions_csv, DashboardState,
    ReportOptions,
};
use telehub::retention::{self, RetentionPolicy};
use telehub::storage::open_store;
use telehub::{api, init_logging, ApiClient, Config, TelemetryService, TelemetrySource};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration first: ENVIRONMENT decides the default log level
    let config = Config::load_from(cli.config.clone())?;
    init_logging(cli.verbosity().for_environment(config.is_development()));

    match cli.command {
        Command::Serve(cmd) => handle_serve(config, cmd).await,
        Command::Dashboard(DashboardCommand::Serve {
            host,
            port,
            api_url,
        }) => handle_dashboard_serve(config, host, port, api_url).await,
        Command::Dashboard(DashboardCommand::Show(cmd)) => handle_dashboard_show(&config, cmd).await,
        Command::SendTest(cmd) => handle_send_test(&config, cmd).await,
        Command::Db(cmd) => handle_db(&config, cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

async fn open_service(config: &Config) -> anyhow::Result<TelemetryService> {
    let store = open_store(config)
        .await
        .context("failed to open telemetry database")?;
    Ok(TelemetryService::with_store(store, config.analytics.clone()))
}

fn api_client(config: &Config, api_url: Option<String>) -> anyhow::Result<ApiClient> {
    let url = api_url.unwrap_or_else(|| config.dashboard.api_url.clone());
    Ok(ApiClient::new(&url, config.request_timeout())?)
}

async fn handle_serve(mut config: Config, cmd: ServeCommand) -> anyhow::Result<()> {
    if let Some(host) = cmd.host {
        config.server.host = host;
    }
    if let Some(port) = cmd.port {
        config.server.port = port;
    }
    if let Some(workers) = cmd.workers {
        config.server.workers = workers;
    }
    config.validate()?;

    let service = open_service(&config).await?;
    info!(
        "Starting telemetry API ({} environment)",
        config.environment
    );

    let retention = RetentionPolicy::from_config(&config)
        .map(|policy| retention::spawn(service.clone(), policy));

    let result = api::api_server(service, &config.server)?.await;

    if let Some(handle) = retention {
        handle.stop();
    }
    result.context("telemetry API server failed")
}

async fn handle_dashboard_serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    api_url: Option<String>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.dashboard.host = host;
    }
    if let Some(port) = port {
        config.dashboard.port = port;
    }
    if let Some(url) = api_url {
        config.dashboard.api_url = url;
    }
    config.validate()?;

    let client = api_client(&config, None)?;
    if let Err(e) = client.health().await {
        // The page shows a warning until the API comes up
        tracing::warn!("Telemetry API not reachable yet: {}", e);
    }

    let state = DashboardState::new(Arc::new(client), config.dashboard.recent_sessions);
    dashboard_server(state, &config.dashboard)?
        .await
        .context("dashboard server failed")
}

async fn handle_dashboard_show(config: &Config, cmd: ShowCommand) -> anyhow::Result<()> {
    let source: Arc<dyn TelemetrySource> = if cmd.local {
        Arc::new(open_service(config).await?)
    } else {
        Arc::new(api_client(config, cmd.api_url)?)
    };

    let options = ReportOptions {
        recent_limit: cmd.limit.unwrap_or(config.dashboard.recent_sessions),
        session: cmd.session,
    };
    let report = build_report(source.as_ref(), &options).await;

    match cmd.format {
        OutputFormat::Text => print!("{}", render_text(&report)),
        OutputFormat::Html => print!("{}", render_html(&report)),
    }

    if let Some(path) = cmd.export_csv {
        std::fs::write(&path, sessions_csv(&report.recent))
            .with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!(
            "Exported {} sessions to {}",
            report.recent.len(),
            path.display()
        );
    }
    Ok(())
}

async fn handle_send_test(config: &Config, cmd: SendTestCommand) -> anyhow::Result<()> {
    let client = api_client(config, cmd.api_url)?;
    let now = Utc::now();
    let session_id = cmd
        .session
        .unwrap_or_else(|| format!("test-session-{}", now.format("%Y%m%d%H%M%S")));

    println!("Sending test event to {}", client.base_url());
    let receipt = client.send_event(&sample_event(&session_id, now)).await?;
    println!("Stored event {} for session {}", receipt.id, session_id);

    println!();
    println!("Current statistics:");
    let stats = client.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn handle_db(config: &Config, cmd: DbCommand) -> anyhow::Result<()> {
    let service = open_service(config).await?;

    match cmd {
        DbCommand::Stats { json } => {
            let stats = service.storage_stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("telehub database");
                println!("----------------");
                println!("Store:         {}", service.describe());
                println!("Events:        {}", stats.total_events);
                println!("Sessions:      {}", stats.total_sessions);
                if let Some(oldest) = stats.oldest_event {
                    println!("Oldest event:  {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                if let Some(newest) = stats.newest_event {
                    println!("Newest event:  {}", newest.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                println!("Size:          {} bytes", stats.db_size_bytes);
            }
        }
        DbCommand::Prune { days } => {
            let days = days.unwrap_or(config.storage.max_age_days);
            if days == 0 {
                bail!("retention is unlimited; pass --days or set storage.max_age_days");
            }
            let pruned = service
                .prune(chrono::Duration::days(i64::from(days)))
                .await?;
            println!("Deleted {pruned} events older than {days} days.");
        }
        DbCommand::Clear { yes } => {
            if yes {
                let deleted = service.clear().await?;
                println!("Deleted {deleted} events.");
            } else {
                println!("This will delete every stored telemetry event.");
                println!("Use --yes to confirm.");
            }
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("Environment:          {}", config.environment);
                println!();
                println!("[Server]");
                println!(
                    "  Listen:             {}:{}",
                    config.server.host, config.server.port
                );
                println!("  Workers:            {}", config.server.workers);
                println!();
                println!("[Storage]");
                match &config.storage.mongodb_uri {
                    Some(_) => println!("  MongoDB database:   {}", config.storage.mongodb_db),
                    None => println!("  Database path:      {}", config.database_path().display()),
                }
                println!("  Max age (days):     {}", config.storage.max_age_days);
                println!(
                    "  Prune interval (h): {}",
                    config.storage.prune_interval_hours
                );
                println!();
                println!("[Analytics]");
                println!(
                    "  Anomaly window (h): {}",
                    config.analytics.anomaly_window_hours
                );
                println!(
                    "  Failure threshold:  {}",
                    config.analytics.failure_rate_threshold
                );
                println!("  Min installs:       {}", config.analytics.min_install_count);
                println!();
                println!("[Dashboard]");
                println!(
                    "  Listen:             {}:{}",
                    config.dashboard.host, config.dashboard.port
                );
                println!("  API URL:            {}", config.dashboard.api_url);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
