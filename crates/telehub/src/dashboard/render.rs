//! Dashboard renderers: HTML page, terminal text and CSV export.

use std::fmt::Write;

use reqwest::Url;

use crate::analytics::RecentSession;

use super::report::DashboardReport;

const PAGE_TITLE: &str = "Installation Telemetry Dashboard";

const STYLE: &str = r"
body { font-family: sans-serif; margin: 2rem; color: #222; }
h1 { margin-bottom: 0; }
.subtitle { color: #666; margin-top: 0.25rem; }
.warning { background: #fff4e5; border-left: 4px solid orange; padding: 0.5rem 1rem; margin: 1rem 0; }
.anomaly { background: #fdecea; border-left: 4px solid red; padding: 0.5rem 1rem; margin: 1rem 0; }
.cards { display: flex; gap: 1rem; margin: 1.5rem 0; }
.card { flex: 1; border: 1px solid #ddd; border-radius: 6px; padding: 1rem; }
.card .label { color: #666; font-size: 0.9rem; }
.card .value { font-size: 1.8rem; font-weight: bold; }
table { border-collapse: collapse; margin: 1rem 0; }
th, td { border-bottom: 1px solid #eee; padding: 0.4rem 0.8rem; text-align: left; }
.bar { background: #4c78a8; height: 0.8rem; }
.dot { display: inline-block; width: 0.8rem; height: 0.8rem; border-radius: 50%; }
footer { margin-top: 2rem; color: #888; font-size: 0.85rem; }
";

/// Escape text for inclusion in HTML content or attribute values.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Link to a session's detail page, with the ID percent-encoded.
fn session_href(session_id: &str) -> String {
    match Url::parse("http://dashboard/sessions") {
        Ok(mut url) => {
            if let Ok(mut path) = url.path_segments_mut() {
                path.push(session_id);
            }
            url.path().to_string()
        }
        Err(_) => "/".to_string(),
    }
}

fn success_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Render the dashboard as a standalone HTML page.
#[must_use]
pub fn render_html(report: &DashboardReport) -> String {
    let mut html = String::new();
    // Writing to a String cannot fail.
    let _ = write_html(&mut html, report);
    html
}

fn write_html(out: &mut String, report: &DashboardReport) -> std::fmt::Result {
    writeln!(out, "<!DOCTYPE html>")?;
    writeln!(out, "<html lang=\"en\"><head><meta charset=\"utf-8\">")?;
    writeln!(out, "<title>{PAGE_TITLE}</title><style>{STYLE}</style></head><body>")?;
    writeln!(out, "<h1>{PAGE_TITLE}</h1>")?;
    writeln!(
        out,
        "<p class=\"subtitle\">Installation telemetry analytics &middot; <a href=\"/\">Refresh</a></p>"
    )?;

    for warning in &report.warnings {
        writeln!(out, "<div class=\"warning\">{}</div>", escape_html(warning))?;
    }
    for anomaly in &report.anomalies {
        writeln!(
            out,
            "<div class=\"anomaly\"><strong>High failure rate</strong>: {:.1}% of {} installs failed; most common failing step: {}</div>",
            anomaly.failure_rate * 100.0,
            anomaly.total_installs,
            escape_html(&anomaly.most_common_failure)
        )?;
    }

    if let Some(kpis) = report.kpis() {
        writeln!(out, "<div class=\"cards\">")?;
        for (label, value) in [
            ("Total installs", kpis.total_installs.to_string()),
            ("Successful installs", kpis.successful_installs.to_string()),
            ("Success rate", kpis.success_rate),
            ("Average install time", kpis.avg_install_time),
        ] {
            writeln!(
                out,
                "<div class=\"card\"><div class=\"label\">{label}</div><div class=\"value\">{value}</div></div>"
            )?;
        }
        writeln!(out, "</div>")?;

        writeln!(out, "<h2>Installs by operating system</h2>")?;
        let shares = report.os_distribution();
        if shares.is_empty() {
            writeln!(out, "<p>No operating system data yet.</p>")?;
        } else {
            writeln!(out, "<table><tr><th>OS</th><th>Installs</th><th>Share</th><th></th></tr>")?;
            for share in shares {
                writeln!(
                    out,
                    "<tr><td>{}</td><td>{}</td><td>{:.1}%</td><td><div class=\"bar\" style=\"width: {:.0}px\"></div></td></tr>",
                    escape_html(&share.name),
                    share.count,
                    share.percent,
                    share.percent * 2.0
                )?;
            }
            writeln!(out, "</table>")?;
        }

        writeln!(out, "<h2>Step status distribution</h2>")?;
        let rows = report.step_breakdown();
        if rows.is_empty() {
            writeln!(out, "<p>No step data yet.</p>")?;
        } else {
            writeln!(out, "<table><tr><th>Step</th><th>Status</th><th>Events</th><th>%</th></tr>")?;
            for row in rows {
                writeln!(
                    out,
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.1}%</td></tr>",
                    escape_html(&row.step),
                    escape_html(&row.status),
                    row.count,
                    row.percent
                )?;
            }
            writeln!(out, "</table>")?;
        }
    }

    writeln!(out, "<h2>Recent install sessions</h2>")?;
    if report.recent.is_empty() {
        writeln!(out, "<p>No recent sessions.</p>")?;
    } else {
        writeln!(out, "<p><a href=\"/sessions.csv\">Export sessions as CSV</a></p>")?;
        writeln!(
            out,
            "<table><tr><th>Session</th><th>Time</th><th>Status</th><th>Duration</th><th>OS</th></tr>"
        )?;
        for session in &report.recent {
            writeln!(
                out,
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td><td>{:.1} s</td><td>{}</td></tr>",
                escape_html(&session_href(&session.session_id)),
                escape_html(&session.session_id),
                session.timestamp.format("%Y-%m-%d %H:%M:%S"),
                success_label(session.success),
                session.duration_seconds,
                escape_html(&session.os)
            )?;
        }
        writeln!(out, "</table>")?;
    }

    if let Some(detail) = &report.session {
        writeln!(out, "<h2>Session {}</h2>", escape_html(&detail.session_id))?;
        writeln!(out, "<table><tr><th></th><th>Time</th><th>Step</th><th>Status</th></tr>")?;
        for entry in &detail.timeline {
            writeln!(
                out,
                "<tr><td><span class=\"dot\" style=\"background: {}\"></span></td><td>{}</td><td>{}</td><td>{}</td></tr>",
                entry.color.as_str(),
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                escape_html(&entry.step),
                escape_html(&entry.status)
            )?;
        }
        writeln!(out, "</table>")?;

        if !detail.final_metrics.is_empty() {
            writeln!(out, "<h3>Final metrics</h3><ul>")?;
            for (key, value) in &detail.final_metrics {
                writeln!(out, "<li>{}: {}</li>", escape_html(key), escape_html(value))?;
            }
            writeln!(out, "</ul>")?;
        }
    }

    writeln!(
        out,
        "<footer>Data from {} &middot; generated {}</footer>",
        escape_html(&report.source),
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out, "</body></html>")
}

/// Render the dashboard for a terminal.
#[must_use]
pub fn render_text(report: &DashboardReport) -> String {
    let mut text = String::new();
    let _ = write_text(&mut text, report);
    text
}

fn write_text(out: &mut String, report: &DashboardReport) -> std::fmt::Result {
    writeln!(out, "{PAGE_TITLE}")?;
    writeln!(out, "{}", "=".repeat(PAGE_TITLE.len()))?;

    for warning in &report.warnings {
        writeln!(out, "WARNING: {warning}")?;
    }
    for anomaly in &report.anomalies {
        writeln!(
            out,
            "ANOMALY: high failure rate {:.1}% over {} installs (most common failure: {})",
            anomaly.failure_rate * 100.0,
            anomaly.total_installs,
            anomaly.most_common_failure
        )?;
    }

    if let Some(kpis) = report.kpis() {
        writeln!(out)?;
        writeln!(out, "Total installs:       {}", kpis.total_installs)?;
        writeln!(out, "Successful installs:  {}", kpis.successful_installs)?;
        writeln!(out, "Success rate:         {}", kpis.success_rate)?;
        writeln!(out, "Average install time: {}", kpis.avg_install_time)?;

        let shares = report.os_distribution();
        if !shares.is_empty() {
            writeln!(out)?;
            writeln!(out, "Installs by OS:")?;
            for share in shares {
                writeln!(
                    out,
                    "  {:<20} {:>6} {:>6.1}%",
                    share.name, share.count, share.percent
                )?;
            }
        }

        let rows = report.step_breakdown();
        if !rows.is_empty() {
            writeln!(out)?;
            writeln!(out, "Step status:")?;
            for row in rows {
                writeln!(
                    out,
                    "  {:<16} {:<12} {:>6} {:>6.1}%",
                    row.step, row.status, row.count, row.percent
                )?;
            }
        }
    }

    writeln!(out)?;
    if report.recent.is_empty() {
        writeln!(out, "No recent sessions.")?;
    } else {
        writeln!(out, "Recent sessions:")?;
        for session in &report.recent {
            writeln!(
                out,
                "  {:<38} {} {:<8} {:>8.1}s  {}",
                session.session_id,
                session.timestamp.format("%Y-%m-%d %H:%M:%S"),
                success_label(session.success),
                session.duration_seconds,
                session.os
            )?;
        }
    }

    if let Some(detail) = &report.session {
        writeln!(out)?;
        writeln!(out, "Session {}:", detail.session_id)?;
        for entry in &detail.timeline {
            writeln!(
                out,
                "  {} [{:<6}] {} - {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.color.as_str(),
                entry.step,
                entry.status
            )?;
        }
        if !detail.final_metrics.is_empty() {
            writeln!(out, "  Final metrics:")?;
            for (key, value) in &detail.final_metrics {
                writeln!(out, "    {key}: {value}")?;
            }
        }
    }

    Ok(())
}

/// Quote a CSV field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Export recent sessions as CSV.
#[must_use]
pub fn sessions_csv(sessions: &[RecentSession]) -> String {
    let mut csv = String::from("session_id,time,status,duration_seconds,os\n");
    for session in sessions {
        let row = [
            csv_field(&session.session_id),
            session.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            success_label(session.success).to_string(),
            format!("{:.1}", session.duration_seconds),
            csv_field(&session.os),
        ];
        csv.push_str(&row.join(","));
        csv.push('\n');
    }
    csv
}
