//! Telemetry dashboard.
//!
//! Builds a [`DashboardReport`] from any [`TelemetrySource`](crate::source::TelemetrySource)
//! and renders it as an HTML page (served on port 8501), terminal text or CSV.

pub mod render;
pub mod report;
pub mod server;

pub use render::{escape_html, render_html, render_text, sessions_csv};
pub use report::{build_report, DashboardReport, ReportOptions, SessionDetail, StatusColor};
pub use server::{dashboard_server, DashboardState};
