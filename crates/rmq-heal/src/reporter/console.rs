//! Console output: colored text or JSON lines.

use colored::{ColoredString, Colorize};
use serde_json::json;
use std::fmt::Write as _;

use super::{CycleError, Report, ReportSink};
use crate::remediation::Outcome;
use crate::rules::Severity;
use crate::snapshot::{Collected, Snapshot};

/// Console rendering style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

pub struct ConsoleSink {
    format: OutputFormat,
}

impl ConsoleSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl ReportSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    fn emit(&self, report: &Report) {
        match self.format {
            OutputFormat::Text => print!("{}", render_text(report)),
            OutputFormat::Json => {
                for line in render_json_lines(report) {
                    println!("{line}");
                }
            }
        }
    }

    fn emit_cycle_error(&self, error: &CycleError) {
        match self.format {
            OutputFormat::Text => {
                eprintln!(
                    "{} {} (retriable: {})",
                    "Cycle failed:".red().bold(),
                    error.message,
                    error.retriable
                );
            }
            OutputFormat::Json => {
                println!("{}", json!({ "type": "cycle-error", "error": error }));
            }
        }
    }
}

fn severity_label(severity: Severity) -> ColoredString {
    match severity {
        Severity::Critical => "CRITICAL".red().bold(),
        Severity::Warning => "WARNING".yellow().bold(),
        Severity::Info => "INFO".cyan(),
    }
}

fn outcome_label(outcome: Outcome) -> ColoredString {
    match outcome {
        Outcome::Succeeded => outcome.as_str().green(),
        Outcome::Failed => outcome.as_str().red(),
        Outcome::SkippedRateLimited => outcome.as_str().yellow(),
    }
}

pub fn render_text(report: &Report) -> String {
    let mut out = String::new();

    if report.is_empty() {
        let _ = writeln!(out, "{}", "No findings.".green());
        return out;
    }

    for group in &report.groups {
        let _ = writeln!(out, "{}", severity_label(group.severity));
        for subject in &group.subjects {
            let _ = writeln!(
                out,
                "  {} {}",
                subject.subject_kind.as_str(),
                subject.subject_id.bold()
            );
            for finding in &subject.findings {
                let _ = write!(out, "    [{}] {}", finding.rule_id, finding.message);
                if let Some(action) = finding.suggested_action {
                    let _ = write!(out, " (suggested: {})", action.as_str());
                }
                out.push('\n');
            }
        }
    }

    if !report.remediations.is_empty() {
        let _ = writeln!(out, "{}", "Remediation".bold());
        for record in &report.remediations {
            let _ = write!(
                out,
                "  {} {}/{}: {}",
                record.action.as_str(),
                record.namespace,
                record.target,
                outcome_label(record.outcome)
            );
            if let Some(detail) = &record.error_detail {
                let _ = write!(out, " ({detail})");
            }
            out.push('\n');
        }
    }

    let _ = writeln!(
        out,
        "{} critical, {} warning, {} info",
        report.counts.critical, report.counts.warning, report.counts.info
    );
    out
}

pub fn render_json_lines(report: &Report) -> Vec<String> {
    let findings = report
        .findings()
        .map(|finding| json!({ "type": "finding", "finding": finding }).to_string());
    let records = report
        .remediations
        .iter()
        .map(|record| json!({ "type": "remediation", "record": record }).to_string());
    findings.chain(records).collect()
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n{}", title.bold());
}

fn unavailable(out: &mut String) {
    let _ = writeln!(out, "  {}", "unavailable".red());
}

const MB: u64 = 1024 * 1024;

/// Text inventory of one snapshot
pub fn render_inventory(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Snapshot taken at {}", snapshot.fetched_at.to_rfc3339());

    section(&mut out, "Bindings");
    match &snapshot.bindings {
        Collected::Available(bindings) => {
            for b in bindings {
                let _ = writeln!(
                    out,
                    "  [{}] {} -> {} ({:?}) key={:?}",
                    b.vhost,
                    if b.source.is_empty() { "(default)" } else { b.source.as_str() },
                    b.destination,
                    b.destination_type,
                    b.routing_key
                );
            }
        }
        Collected::Unavailable => unavailable(&mut out),
    }

    for scoped in &snapshot.scoped_bindings {
        section(&mut out, &format!("Bindings of {}", scoped.scope));
        match &scoped.bindings {
            Collected::Available(bindings) => {
                for b in bindings {
                    let _ = writeln!(out, "  {} -> {} key={:?}", b.source, b.destination, b.routing_key);
                }
            }
            Collected::Unavailable => unavailable(&mut out),
        }
    }

    for (vhost, listing) in &snapshot.queues {
        section(&mut out, &format!("Queues in {vhost}"));
        match listing {
            Collected::Available(queues) => {
                for q in queues.values() {
                    let dlx = q
                        .argument_str(crate::rules::r1_unroutable_messages::DEAD_LETTER_EXCHANGE_ARG)
                        .unwrap_or("-");
                    let _ = writeln!(
                        out,
                        "  {} ready={} unacked={} total={} consumers={} durable={} dlx={}",
                        q.name,
                        q.messages_ready,
                        q.messages_unacked,
                        q.messages_total,
                        q.consumers,
                        q.durable,
                        dlx
                    );
                }
            }
            Collected::Unavailable => unavailable(&mut out),
        }
    }

    section(&mut out, "Connections");
    match &snapshot.connections {
        Collected::Available(connections) => {
            for c in connections {
                let _ = writeln!(
                    out,
                    "  {} user={} state={} channels={} since={}",
                    c.name,
                    c.user,
                    c.state.as_str(),
                    c.channel_count,
                    c.connected_at.to_rfc3339()
                );
            }
        }
        Collected::Unavailable => unavailable(&mut out),
    }

    section(&mut out, "Channels");
    match &snapshot.channels {
        Collected::Available(channels) => {
            for ch in channels {
                let _ = writeln!(
                    out,
                    "  {} connection={} consumers={} unacked={}",
                    ch.name, ch.owning_connection_name, ch.consumer_count, ch.unacked_message_count
                );
            }
        }
        Collected::Unavailable => unavailable(&mut out),
    }

    section(&mut out, "Nodes");
    match &snapshot.nodes {
        Collected::Available(nodes) => {
            for n in nodes {
                let fd = n
                    .fd_ratio()
                    .map_or_else(|| "n/a".to_string(), |r| format!("{:.1}%", r * 100.0));
                let _ = writeln!(
                    out,
                    "  {} disk_free={}MB disk_limit={}MB mem={}/{}MB fd={}/{} ({})",
                    n.name,
                    n.disk_free_bytes / MB,
                    n.disk_free_limit_bytes / MB,
                    n.mem_used_bytes / MB,
                    n.mem_limit_bytes / MB,
                    n.fd_used,
                    n.fd_total,
                    fd
                );
            }
        }
        Collected::Unavailable => unavailable(&mut out),
    }

    section(&mut out, "Pods");
    match &snapshot.pods {
        Collected::Available(pods) => {
            for p in pods {
                let _ = writeln!(
                    out,
                    "  {}/{} phase={} restarts={}",
                    p.namespace, p.name, p.phase, p.restart_count
                );
            }
        }
        Collected::Unavailable => unavailable(&mut out),
    }

    out
}
