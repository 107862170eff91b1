//! Human and machine readable run reports

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde::Serialize;
use tidepool_connection::{PerformanceMetrics, PoolStats};

use crate::workload::WorkloadSummary;

/// Everything printed at the end of `tidepool run`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workload: WorkloadSummary,
    pub stats: PoolStats,
    pub metrics: PerformanceMetrics,
}

impl RunReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n{}",
            workload_table(&self.workload),
            stats_table(&self.stats),
            metrics_table(&self.metrics)
        )
    }
}

fn table(title: &str) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![title, "Value"]);
    table
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

pub fn workload_table(summary: &WorkloadSummary) -> Table {
    let mut table = table("Workload");
    let throughput = if summary.elapsed_ms == 0 {
        0.0
    } else {
        summary.operations as f64 * 1000.0 / summary.elapsed_ms as f64
    };
    table
        .add_row(vec!["operations".to_string(), summary.operations.to_string()])
        .add_row(vec!["ops/sec".to_string(), format!("{:.0}", throughput)])
        .add_row(vec!["reads".to_string(), summary.reads.to_string()])
        .add_row(vec!["writes".to_string(), summary.writes.to_string()])
        .add_row(vec![
            "transactions committed".to_string(),
            summary.transactions_committed.to_string(),
        ])
        .add_row(vec![
            "transactions rolled back".to_string(),
            summary.transactions_rolled_back.to_string(),
        ])
        .add_row(vec!["failures".to_string(), summary.failures.to_string()])
        .add_row(vec![
            "acquire timeouts".to_string(),
            summary.acquire_timeouts.to_string(),
        ]);
    table
}

pub fn stats_table(stats: &PoolStats) -> Table {
    let mut table = table("Pool");
    table
        .add_row(vec!["health".to_string(), stats.health.to_string()])
        .add_row(vec!["current size".to_string(), stats.current_size.to_string()])
        .add_row(vec!["idle".to_string(), stats.idle.to_string()])
        .add_row(vec!["leased".to_string(), stats.leased.to_string()])
        .add_row(vec!["acquired (new)".to_string(), stats.created.to_string()])
        .add_row(vec!["acquired (reused)".to_string(), stats.reused.to_string()])
        .add_row(vec!["errors".to_string(), stats.errors.to_string()])
        .add_row(vec!["timeouts".to_string(), stats.timeouts.to_string()])
        .add_row(vec!["opened".to_string(), stats.opened.to_string()])
        .add_row(vec!["closed".to_string(), stats.closed.to_string()]);
    table
}

pub fn metrics_table(metrics: &PerformanceMetrics) -> Table {
    let mut table = table("Performance");
    table
        .add_row(vec!["utilization".to_string(), percent(metrics.utilization_rate)])
        .add_row(vec!["reuse rate".to_string(), percent(metrics.reuse_rate)])
        .add_row(vec!["error rate".to_string(), percent(metrics.error_rate)])
        .add_row(vec!["timeout rate".to_string(), percent(metrics.timeout_rate)])
        .add_row(vec!["efficiency".to_string(), format!("{:.2}", metrics.efficiency)])
        .add_row(vec!["avg leased".to_string(), format!("{:.2}", metrics.avg_leased)])
        .add_row(vec![
            "recommended size".to_string(),
            metrics.recommended_size.to_string(),
        ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.0), "0.0%");
        assert_eq!(percent(0.125), "12.5%");
    }

    #[test]
    fn test_workload_table_handles_zero_elapsed() {
        let rendered = workload_table(&WorkloadSummary::default()).to_string();
        assert!(rendered.contains("ops/sec"));
        assert!(rendered.contains("Workload"));
    }
}
