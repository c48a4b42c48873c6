//! The status report: an external collaborator the core only consumes
//! through the `ReportRenderer` trait. `DefaultRenderer` builds the
//! flat HTML table directly with `std::fmt::Write`; there's no
//! branching complex enough to warrant a templating engine.

use std::fmt::Write as _;

use crate::config::Config;
use crate::process_table::ProcessTable;
use crate::resources::ResourceProbe;

pub struct ReportContext<'a> {
    pub description: &'a str,
    pub start_time: i64,
    pub now: i64,
    pub config: &'a Config,
    pub table: &'a ProcessTable,
    pub probe: Option<&'a dyn ResourceProbe>,
}

pub trait ReportRenderer {
    fn render(&self, ctx: &ReportContext<'_>) -> String;
}

pub struct DefaultRenderer;

impl ReportRenderer for DefaultRenderer {
    fn render(&self, ctx: &ReportContext<'_>) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "<html><head><title>metasys: {0}</title></head><body>",
            escape(ctx.description)
        );
        let _ = write!(
            out,
            "<h1>{}</h1><p>up since {}</p>",
            escape(ctx.description),
            ctx.start_time
        );
        let _ = write!(
            out,
            "<p>start_delay={}s restart_delay={}s term_wait={}s mta={}</p>",
            ctx.config.start_delay,
            ctx.config.restart_delay,
            ctx.config.term_wait,
            escape(&ctx.config.mta_host),
        );

        out.push_str("<table border=\"1\"><tr><th>Label</th><th>Group</th><th>PID</th><th>Last Start</th><th>Up For</th><th>Restarts</th><th>Command</th>");
        if ctx.probe.is_some() {
            out.push_str("<th>CPU%</th><th>Mem%</th><th>VSize</th><th>RSS</th><th>State</th>");
        }
        out.push_str("</tr>");

        let mut labels: Vec<&str> = ctx.table.labels().collect();
        labels.sort();
        for label in labels {
            let rec = match ctx.table.get(label) {
                Some(r) => r,
                None => continue,
            };
            let _ = write!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td>",
                escape(&rec.label),
                rec.group.as_deref().map(escape).unwrap_or_default(),
                rec.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                rec.last_started.map(|t| t.to_string()).unwrap_or_else(|| "never".to_string()),
                rec.last_started
                    .map(|t| humanize_duration(ctx.now - t))
                    .unwrap_or_else(|| "-".to_string()),
                rec.restart_count,
                escape(&rec.command),
            );
            if let Some(probe) = ctx.probe {
                match rec.pid.and_then(|pid| probe.sample(pid)) {
                    Some(sample) => {
                        let _ = write!(
                            out,
                            "<td>{:.1}</td><td>{:.1}</td><td>{}</td><td>{}</td><td>{}</td>",
                            sample.cpu_percent,
                            sample.mem_percent,
                            sample.vsize_kb,
                            sample.rss_kb,
                            sample.state,
                        );
                    }
                    None => out.push_str("<td>-</td><td>-</td><td>-</td><td>-</td><td>-</td>"),
                }
            }
            out.push_str("</tr>");
        }

        out.push_str("</table></body></html>");
        out
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Renders a duration in seconds as e.g. `2d 3h 14m 9s`, dropping
/// leading zero units.
pub fn humanize_duration(seconds: i64) -> String {
    if seconds < 0 {
        return "0s".to_string();
    }
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || days > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || hours > 0 || days > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{secs}s"));
    parts.join(" ")
}
