use std::fmt::Write as _;

use stampede_core::metrics::{CollectorSnapshot, TrendSnapshot, parse_metric_key};
use stampede_core::{CHECK_TAG, CHECKS, RunSummary, SummaryExporter};

use super::format::{format_bytes, format_duration, format_ms, format_number};

/// Plain-text end-of-run summary, also written as `summary.txt`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TextExporter;

impl SummaryExporter for TextExporter {
    fn format(&self) -> &'static str {
        "text"
    }

    fn export(&self, summary: &RunSummary) -> stampede_core::Result<String> {
        Ok(render(summary))
    }
}

pub(crate) fn render(summary: &RunSummary) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(out, "  state: {}", summary.state).ok();
    writeln!(out, "  duration: {}", format_duration(summary.duration)).ok();
    writeln!(
        out,
        "  iterations: {} (interrupted {})",
        summary.iterations, summary.interrupted_iterations
    )
    .ok();
    writeln!(out, "  vus_max: {}", summary.vus_max).ok();

    render_checks(summary, &mut out);
    render_metrics(summary, &mut out);
    render_thresholds(summary, &mut out);

    let ingest_errors = summary
        .ingest_errors
        .iter()
        .filter(|(_, n)| **n > 0)
        .collect::<Vec<_>>();
    if !ingest_errors.is_empty() {
        out.push_str("\ningest_errors\n");
        for (reason, n) in ingest_errors {
            writeln!(out, "  {reason}: {n}").ok();
        }
    }

    out
}

/// Name of the check a `checks{check:...}` key counts, if it is one.
fn check_name(key: &str) -> Option<String> {
    if !key.starts_with(CHECKS) || !key.contains('{') {
        return None;
    }
    let (name, tags) = parse_metric_key(key).ok()?;
    if name != CHECKS || tags.len() != 1 {
        return None;
    }
    tags.get(CHECK_TAG).map(str::to_string)
}

fn render_checks(summary: &RunSummary, out: &mut String) {
    let checks = summary
        .metrics
        .iter()
        .filter_map(|(key, snap)| match (check_name(key), snap) {
            (Some(name), CollectorSnapshot::Rate(r)) => Some((name, r)),
            _ => None,
        })
        .collect::<Vec<_>>();
    if checks.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");
    for (name, r) in checks {
        if r.fails == 0 {
            writeln!(out, "  ✓ {name}: {} passed", r.passes).ok();
        } else {
            writeln!(out, "  ✗ {name}: {} passed, {} failed", r.passes, r.fails).ok();
        }
    }
}

fn render_metrics(summary: &RunSummary, out: &mut String) {
    let rows = summary
        .metrics
        .iter()
        .filter(|(key, _)| check_name(key).is_none())
        .collect::<Vec<_>>();
    if rows.is_empty() {
        return;
    }

    let width = rows.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0) + 3;

    out.push_str("\nmetrics\n");
    for (key, snap) in rows {
        writeln!(out, "  {key:.<width$}: {}", metric_value(key, snap)).ok();
    }
}

fn metric_value(key: &str, snap: &CollectorSnapshot) -> String {
    match snap {
        CollectorSnapshot::Counter(c) if key.starts_with("data_") => format!(
            "{} {}/s",
            format_bytes(c.count.max(0.0) as u64),
            format_bytes(c.rate.max(0.0).round() as u64)
        ),
        CollectorSnapshot::Counter(c) => {
            format!("{} {}/s", format_number(c.count), format_number(c.rate))
        }
        CollectorSnapshot::Rate(r) => format!(
            "{:.2}% ({}/{})",
            r.rate * 100.0,
            r.passes,
            r.passes + r.fails
        ),
        CollectorSnapshot::Trend(t) => trend_value(t),
    }
}

fn trend_value(t: &TrendSnapshot) -> String {
    if t.count == 0 {
        return "no data".to_string();
    }
    let ms = |v: Option<f64>| v.map(format_ms).unwrap_or_else(|| "-".to_string());
    format!(
        "avg={} min={} med={} max={} p(90)={} p(95)={}",
        ms(t.avg),
        ms(t.min),
        ms(t.med),
        ms(t.max),
        ms(t.p90),
        ms(t.p95)
    )
}

fn render_thresholds(summary: &RunSummary, out: &mut String) {
    if summary.thresholds.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for (name, t) in &summary.thresholds {
        let mark = if t.passed { '✓' } else { '✗' };
        match t.observed {
            Some(v) => writeln!(out, "  {mark} {name} (observed {})", format_number(v)).ok(),
            None => writeln!(out, "  {mark} {name} (no data)").ok(),
        };
    }
}
