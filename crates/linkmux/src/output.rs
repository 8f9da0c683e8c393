use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Round-trip results of one `ping` run.
#[derive(Debug, Clone, Serialize)]
pub struct PingReport {
    pub addr: String,
    pub important: bool,
    pub sent: usize,
    pub received: usize,
    pub lost: usize,
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub rtt_ms: Vec<f64>,
}

/// What a `pong` server did before it stopped.
#[derive(Debug, Clone, Serialize)]
pub struct PongSummary {
    pub addr: String,
    pub connections: usize,
    pub channels: u64,
    pub echoed: u64,
}

pub fn print_ping_report(report: &PingReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(&[
            ("ADDR", report.addr.clone()),
            ("IMPORTANT", report.important.to_string()),
            ("SENT", report.sent.to_string()),
            ("RECEIVED", report.received.to_string()),
            ("LOST", report.lost.to_string()),
            ("MIN MS", millis(report.min_ms)),
            ("AVG MS", millis(report.avg_ms)),
            ("MAX MS", millis(report.max_ms)),
        ]),
        OutputFormat::Pretty => {
            println!(
                "{} samples to {} ({}): {} received, {} lost, rtt min/avg/max = {}/{}/{} ms",
                report.sent,
                report.addr,
                if report.important { "important" } else { "best effort" },
                report.received,
                report.lost,
                millis(report.min_ms),
                millis(report.avg_ms),
                millis(report.max_ms),
            );
        }
        OutputFormat::Raw => {
            let mut out = String::new();
            for rtt in &report.rtt_ms {
                out.push_str(&format!("{rtt:.3}\n"));
            }
            print_raw(out.as_bytes());
        }
    }
}

pub fn print_pong_summary(summary: &PongSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => print_table(&[
            ("ADDR", summary.addr.clone()),
            ("CONNECTIONS", summary.connections.to_string()),
            ("CHANNELS", summary.channels.to_string()),
            ("ECHOED", summary.echoed.to_string()),
        ]),
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "served {} connections on {}: {} channels, {} samples echoed",
                summary.connections, summary.addr, summary.channels, summary.echoed
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(rows.iter().map(|(name, _)| *name).collect::<Vec<_>>())
        .add_row(rows.iter().map(|(_, value)| value.clone()).collect::<Vec<_>>());
    println!("{table}");
}

fn millis(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| format!("{ms:.3}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_statistics_render_as_dash() {
        assert_eq!(millis(None), "-");
        assert_eq!(millis(Some(1.23456)), "1.235");
    }

    #[test]
    fn report_serializes_with_stable_field_names() {
        let report = PingReport {
            addr: "unix:/tmp/x.sock".into(),
            important: true,
            sent: 2,
            received: 1,
            lost: 1,
            min_ms: Some(0.5),
            avg_ms: Some(0.5),
            max_ms: Some(0.5),
            rtt_ms: vec![0.5],
        };
        let value: serde_json::Value =
            serde_json::to_value(&report).expect("report should serialize");
        assert_eq!(value["received"], 1);
        assert_eq!(value["lost"], 1);
        assert_eq!(value["rtt_ms"][0], 0.5);
    }
}
