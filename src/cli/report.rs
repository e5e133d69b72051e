use super::ui;
use crate::core::gateway::Gateway;
use crate::core::model::{Record, Report, ReportRequest, ReportStatus, Snapshot};
use crate::core::query::ListQuery;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color};
use std::time::Duration;

const POLL_ATTEMPTS: usize = 30;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum ReportAction {
    List,
    Generate { request: ReportRequest, wait: bool },
    Schedule { request: ReportRequest, at: DateTime<Utc> },
}

fn status_cell(status: ReportStatus) -> Cell {
    let color = match status {
        ReportStatus::Completed => Color::Green,
        ReportStatus::InProgress => Color::Yellow,
        ReportStatus::Scheduled => Color::DarkGrey,
    };
    Cell::new(status.to_string()).fg(color)
}

pub fn display_reports(reports: &[Record<Report>]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("ID"),
        ui::header_cell("Name"),
        ui::header_cell("Subject"),
        ui::header_cell("Format"),
        ui::header_cell("Status"),
        ui::header_cell("Created"),
    ]);
    for record in reports {
        let report = &record.data;
        table.add_row(vec![
            Cell::new(&record.id),
            Cell::new(&report.name),
            Cell::new(report.subject.to_string()),
            Cell::new(report.format.to_string()),
            status_cell(report.status),
            Cell::new(record.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }
    table.to_string()
}

fn describe(record: &Record<Report>) -> String {
    let report = &record.data;
    let mut output = format!(
        "{} ({}) is {}",
        ui::style_text(&report.name, ui::StyleType::TotalLabel),
        record.id,
        report.status
    );
    if let Some(at) = report.scheduled_for.filter(|_| report.status == ReportStatus::Scheduled) {
        output.push_str(&format!("\nRuns at {}", at.format("%Y-%m-%d %H:%M UTC")));
    }
    if let Some(url) = &report.download_url {
        output.push_str(&format!("\nDownload: {url}"));
    }
    match &report.snapshot {
        Some(Snapshot::Property(metrics)) => {
            output.push_str(&format!("\n\n{}", metrics.display_as_table("Snapshot")));
        }
        Some(Snapshot::Portfolio(totals)) => {
            output.push_str(&format!(
                "\n\nSnapshot: {} properties worth {}, {} monthly cash flow",
                totals.property_count,
                ui::money(totals.total_value),
                ui::money(totals.total_monthly_cash_flow)
            ));
        }
        Some(Snapshot::Market(detail)) => {
            output.push_str(&format!("\n\n{}", detail.display_as_table()));
        }
        None => {}
    }
    output
}

pub async fn run(gateway: &Gateway, action: ReportAction) -> Result<()> {
    match action {
        ReportAction::List => {
            gateway
                .credentials()
                .session()
                .context("No active session; run `dealdesk login`")?;
            let page = gateway
                .reports()
                .list_or_empty(ListQuery::new().page(50, 0))
                .await;
            println!("{}", display_reports(&page.items));
        }
        ReportAction::Generate { request, wait } => {
            let mut record = gateway
                .generate_report(&request)
                .await
                .with_context(|| format!("Failed to generate report for {}", request.subject))?;
            if wait && record.data.status != ReportStatus::Completed {
                let pb = ui::new_spinner("Waiting for report...");
                let result = gateway
                    .wait_for_report(&record.id, POLL_ATTEMPTS, POLL_INTERVAL)
                    .await;
                pb.finish_and_clear();
                record = result.context("Report did not complete")?;
            }
            println!("{}", describe(&record));
        }
        ReportAction::Schedule { request, at } => {
            let record = gateway
                .schedule_report(&request, at)
                .await
                .with_context(|| format!("Failed to schedule report for {}", request.subject))?;
            println!("{}", describe(&record));
        }
    }
    Ok(())
}
