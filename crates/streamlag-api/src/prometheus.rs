//! Prometheus text exposition format.
//!
//! Renders trigger snapshots for scraping. Values come from the last poll;
//! rendering never polls.

use std::fmt::Write;

use streamlag_scaler::{HealthStatus, TriggerSnapshot};

/// Render trigger snapshots into Prometheus text format.
///
/// Every series carries `trigger`, `stream` and `group` labels.
pub fn render_prometheus(snapshots: &[TriggerSnapshot]) -> String {
    let mut out = String::new();

    family(
        &mut out,
        "streamlag_lag",
        "gauge",
        "Lag measured by the last successful poll.",
    );
    for s in snapshots {
        if let Some(lag) = s.last_lag {
            sample(&mut out, "streamlag_lag", s, lag.get());
        }
    }

    family(
        &mut out,
        "streamlag_active",
        "gauge",
        "Whether the trigger is active (1) or idle (0).",
    );
    for s in snapshots {
        let active = s.last_verdict.is_some_and(|v| v.active);
        sample(&mut out, "streamlag_active", s, u64::from(active));
    }

    family(
        &mut out,
        "streamlag_trigger_healthy",
        "gauge",
        "Whether the last poll succeeded (1) or not (0).",
    );
    for s in snapshots {
        let healthy = s.health == HealthStatus::Healthy;
        sample(&mut out, "streamlag_trigger_healthy", s, u64::from(healthy));
    }

    family(
        &mut out,
        "streamlag_consecutive_failures",
        "gauge",
        "Consecutive failed polls.",
    );
    for s in snapshots {
        sample(
            &mut out,
            "streamlag_consecutive_failures",
            s,
            u64::from(s.consecutive_failures),
        );
    }

    family(
        &mut out,
        "streamlag_primary_invalidations_total",
        "counter",
        "Primary connections dropped after an I/O failure or failover.",
    );
    for s in snapshots {
        sample(
            &mut out,
            "streamlag_primary_invalidations_total",
            s,
            s.invalidations,
        );
    }

    family(&mut out, "streamlag_polls_total", "counter", "Polls run.");
    for s in snapshots {
        sample(&mut out, "streamlag_polls_total", s, s.polls);
    }

    out
}

fn family(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn sample(out: &mut String, name: &str, s: &TriggerSnapshot, value: u64) {
    let _ = writeln!(
        out,
        "{name}{{trigger=\"{}\",stream=\"{}\",group=\"{}\"}} {value}",
        escape(&s.name),
        escape(&s.target.stream),
        escape(&s.target.consumer_group),
    );
}

fn escape(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
