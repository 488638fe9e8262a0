//! Formatted terminal output.
//!
//! Formatting lives here so the engine modules stay free of presentation and
//! output changes stay localized.

use crate::aggregate::CycleBreakdown;
use crate::app::pipeline::{CycleOutcome, RunOutput};
use crate::domain::{ClassifiedRecord, CycleSummary, RecordRejection, Severity};
use crate::notes::AnalystNote;
use crate::report::{HistoryEntry, rank_anomalies};

/// Full terminal report for one cycle.
pub fn format_cycle_report(outcome: &CycleOutcome, top_n: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== Billing cycle {} ===\n", outcome.cycle));
    out.push_str(&format_summary(&outcome.summary));
    out.push_str(&format_breakdown(&outcome.breakdown));
    out.push('\n');

    let ranked = rank_anomalies(&outcome.records, top_n);
    if ranked.is_empty() {
        out.push_str("No anomalies.\n");
    } else {
        out.push_str(&format!(
            "Top anomalies ({} of {}):\n",
            ranked.len(),
            outcome.summary.anomaly_count
        ));
        out.push_str(&format_anomaly_table(&ranked));
    }

    if !outcome.rejections.is_empty() {
        out.push('\n');
        out.push_str(&format_rejections(&outcome.rejections));
    }
    out
}

pub fn format_summary(summary: &CycleSummary) -> String {
    let rate = if summary.record_count == 0 {
        0.0
    } else {
        summary.anomaly_count as f64 / summary.record_count as f64 * 100.0
    };
    format!(
        "Records: {} | anomalies: {} ({rate:.1}%) | total billed incl. grand totals: {}\n",
        summary.record_count,
        summary.anomaly_count,
        fmt_amount(summary.total_amount)
    )
}

pub fn format_breakdown(b: &CycleBreakdown) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Rules: new_code={} drop_to_zero={} grand_total={} threshold_breach={}\n",
        b.new_code_count, b.drop_to_zero_count, b.grand_total_count, b.threshold_breach_count
    ));

    let severities: Vec<String> = Severity::ALL
        .iter()
        .map(|s| format!("{}={}", s.label(), b.by_severity.get(s).copied().unwrap_or(0)))
        .collect();
    out.push_str(&format!("Severity: {}\n", severities.join(" ")));
    out.push_str(&format!(
        "Billed excluding grand totals: {}\n",
        fmt_amount(b.billed_excluding_grand_totals)
    ));
    out.push_str(&format!(
        "Avg delta: mean={} std={}\n",
        fmt_opt_amount(b.mean_avg_delta),
        fmt_opt_amount(b.std_avg_delta)
    ));

    for c in &b.categories {
        out.push_str(&format!(
            "  {:<22} records={:<5} anomalies={:<4} mean_delta={} mean_pct={}\n",
            c.category.display_name(),
            c.record_count,
            c.anomaly_count,
            fmt_opt_amount(c.mean_anomaly_delta),
            fmt_opt_percent(c.mean_anomaly_percent),
        ));
    }
    out
}

fn format_anomaly_table(rows: &[&ClassifiedRecord]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<4} {:<14} {:>16} {:>16} {:>9} {:<16} {:<9} {:>6}\n",
            "type", "code", "current", "rolling_avg", "change", "rule", "severity", "score"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<4} {:-<14} {:-<16} {:-<16} {:-<9} {:-<16} {:-<9} {:-<6}\n",
            "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for c in rows {
        let v = &c.verdict;
        out.push_str(
            format!(
                "{:<4} {:<14} {:>16} {:>16} {:>9} {:<16} {:<9} {:>6}\n",
                c.record.category.tag(),
                truncate(&c.record.code, 14),
                fmt_amount(c.record.series.current()),
                fmt_opt_amount(c.metrics.rolling_average),
                fmt_opt_percent(c.metrics.avg_percent),
                v.rule.map(|r| r.label()).unwrap_or(""),
                v.severity.map(|s| s.label()).unwrap_or(""),
                v.score.map(|s| format!("{s:.2}")).unwrap_or_default(),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

pub fn format_rejections(rejections: &[RecordRejection]) -> String {
    let mut out = format!("Rejected records ({}):\n", rejections.len());
    for r in rejections {
        let line = r.line.map(|l| format!("line {l}")).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!("  {:<10} {:<14} {}\n", line, truncate(&r.code, 14), r.reason));
    }
    out
}

/// One line per cycle plus any failed cycles.
pub fn format_run_overview(run: &RunOutput) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Processed {} cycle(s), {} failed, {} record(s) rejected.\n",
        run.cycles.len(),
        run.failures.len(),
        run.rejection_count()
    ));
    for o in &run.cycles {
        out.push_str(&format!(
            "  {:<12} records={:<5} anomalies={:<4} total={}\n",
            o.cycle.to_string(),
            o.summary.record_count,
            o.summary.anomaly_count,
            fmt_amount(o.summary.total_amount)
        ));
    }
    for f in &run.failures {
        out.push_str(&format!("  {:<12} FAILED: {}\n", f.cycle.to_string(), f.error));
    }
    out
}

pub fn format_history(code: &str, entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return format!("No records for billing code {code}.\n");
    }
    let mut out = format!("History for {code} ({} cycle entries):\n", entries.len());
    for e in entries {
        let flag = match e.rule {
            Some(rule) => format!("ANOMALY ({})", rule.label()),
            None => String::new(),
        };
        out.push_str(
            format!(
                "  {:<12} {:<4} current={:>16} avg={:>16} change={:>9} {flag}\n",
                e.cycle.to_string(),
                e.category.tag(),
                fmt_amount(e.current),
                fmt_opt_amount(e.rolling_average),
                fmt_opt_percent(e.avg_percent),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

pub fn format_notes(notes: &[AnalystNote]) -> String {
    if notes.is_empty() {
        return "No notes.\n".to_string();
    }
    let mut out = String::new();
    for n in notes {
        out.push_str(&format!(
            "  [{}] {}: {}\n",
            n.created_at.format("%Y-%m-%d %H:%M"),
            n.author.as_deref().unwrap_or("anonymous"),
            n.text
        ));
    }
    out
}

fn fmt_amount(v: f64) -> String {
    format!("{v:.2}")
}

fn fmt_opt_amount(v: Option<f64>) -> String {
    v.map(fmt_amount).unwrap_or_else(|| "n/a".to_string())
}

fn fmt_opt_percent(v: Option<f64>) -> String {
    v.map(|p| format!("{:+.1}%", p * 100.0)).unwrap_or_else(|| "n/a".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
