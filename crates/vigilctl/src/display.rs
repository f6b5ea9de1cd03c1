//! Terminal rendering for vigilctl

use owo_colors::OwoColorize;
use vigil_common::{
    HealthReport, HealthSummary, OverallStatus, ProbeResult, ProbeStatus, SummaryStatus,
    WorkflowResult, WorkflowStatus,
};

const HR: &str = "------------------------------------------------------------";

/// Name column width, never narrower than the header
fn name_width(deps: &[ProbeResult]) -> usize {
    deps.iter()
        .map(|d| d.name.len())
        .max()
        .unwrap_or(0)
        .max("DEPENDENCY".len())
}

fn colored_overall(status: OverallStatus) -> String {
    match status {
        OverallStatus::Healthy => status.as_str().bright_green().to_string(),
        OverallStatus::Degraded => status.as_str().yellow().to_string(),
        OverallStatus::Unhealthy => status.as_str().bright_red().to_string(),
    }
}

fn colored_probe(status: ProbeStatus, width: usize) -> String {
    let padded = format!("{:width$}", status.as_str(), width = width);
    match status {
        ProbeStatus::Available => padded.green().to_string(),
        ProbeStatus::Degraded => padded.yellow().to_string(),
        ProbeStatus::Unavailable => padded.red().to_string(),
    }
}

fn detail(dep: &ProbeResult) -> String {
    match (&dep.error, &dep.message) {
        (Some(kind), Some(msg)) => format!("{}: {}", kind, msg),
        (Some(kind), None) => kind.to_string(),
        (None, Some(msg)) => msg.clone(),
        (None, None) => String::new(),
    }
}

pub fn print_summary(summary: &HealthSummary) {
    let status = match summary.status {
        SummaryStatus::Healthy => "healthy".bright_green().to_string(),
        SummaryStatus::Unhealthy => "unhealthy".bright_red().to_string(),
    };
    println!("{}  {}", summary.service.bold(), status);
    println!("checked {}", summary.timestamp.format("%Y-%m-%d %H:%M:%S UTC").dimmed());
}

pub fn print_report(report: &HealthReport) {
    println!();
    println!(
        "{} v{}  {}  (up {}s)",
        report.service.bold(),
        report.version,
        colored_overall(report.status),
        report.uptime
    );
    println!("{}", HR.dimmed());

    let width = name_width(&report.dependencies);
    println!(
        "{}",
        format!(
            "{:width$}  {:11}  {:>10}  {}",
            "DEPENDENCY",
            "STATUS",
            "LATENCY",
            "DETAIL",
            width = width
        )
        .dimmed()
    );
    for dep in &report.dependencies {
        println!(
            "{:width$}  {}  {:>7} ms  {}",
            dep.name,
            colored_probe(dep.status, 11),
            dep.response_time.as_millis(),
            detail(dep),
            width = width
        );
    }

    if !report.metrics.is_empty() {
        println!();
        println!("{}", "[SYSTEM]".cyan());
        for (name, value) in &report.metrics {
            println!("  {:16} {:>6.1}%", name, value);
        }
    }

    if let Some(custom) = &report.custom_metrics {
        println!();
        println!("{}", "[APPLICATION]".cyan());
        for (name, value) in custom {
            println!("  {:16} {}", name, value);
        }
    }
    println!();
}

pub fn print_workflow(result: &WorkflowResult) {
    let status = match result.status {
        WorkflowStatus::Success => "success".bright_green().to_string(),
        WorkflowStatus::Partial => "partial".yellow().to_string(),
        WorkflowStatus::Failed => "failed".bright_red().to_string(),
    };
    println!();
    println!(
        "workflow {}  {}{}",
        result.workflow_id.to_string().dimmed(),
        status,
        if result.cached { "  (cached)" } else { "" }
    );

    if let Some(err) = &result.error {
        println!("[ERROR] {}: {}", err.kind.as_str().bright_red(), err.message);
        println!();
        return;
    }
    if result.status == WorkflowStatus::Partial {
        println!("[NOTE] {}", "metadata enrichment unavailable".yellow());
    }

    println!("{}", HR.dimmed());
    for (i, rec) in result.recommendations.iter().enumerate() {
        let title = rec.title.as_deref().unwrap_or("");
        println!(
            "{:>3}. {:24} {:.3}  {}",
            i + 1,
            rec.id,
            rec.confidence,
            title
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_common::ErrorKind;

    #[test]
    fn test_detail_for_healthy_dependency_is_empty() {
        let dep = ProbeResult::available("inference", Duration::from_millis(42));
        assert_eq!(detail(&dep), "");
    }

    #[test]
    fn test_detail_carries_error_kind_and_message() {
        let dep = ProbeResult::unavailable(
            "cache",
            Duration::from_millis(500),
            ErrorKind::ConnectionRefused,
            "connect failed",
        );
        assert_eq!(detail(&dep), "connection_refused: connect failed");
    }

    #[test]
    fn test_name_width_fits_longest() {
        let deps = vec![
            ProbeResult::available("a", Duration::ZERO),
            ProbeResult::available("recommendation-store", Duration::ZERO),
        ];
        assert_eq!(name_width(&deps), "recommendation-store".len());
        assert_eq!(name_width(&[]), "DEPENDENCY".len());
    }
}
