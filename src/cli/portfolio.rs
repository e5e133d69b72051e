use super::ui;
use crate::core::aggregate::PortfolioSummary;
use crate::core::gateway::Gateway;
use crate::core::model::Portfolio;
use crate::core::query::ListQuery;
use anyhow::{Context, Result};
use comfy_table::{Cell, Color};

#[derive(Debug, Clone, PartialEq)]
pub enum PortfolioAction {
    List,
    Show {
        id: String,
    },
    Create {
        name: String,
        description: Option<String>,
    },
    Add {
        id: String,
        property_id: String,
    },
    Remove {
        id: String,
        property_id: String,
    },
    Delete {
        id: String,
    },
}

impl PortfolioSummary {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Property"),
            ui::header_cell("Value"),
            ui::header_cell("Price"),
            ui::header_cell("Cash Flow (mo)"),
            ui::header_cell("Cap Rate"),
            ui::header_cell("Cash-on-Cash"),
        ]);

        for holding in &self.holdings {
            let has_error = holding.error.is_some();
            let label = match &holding.error {
                Some(e) => Cell::new(format!("{}\n{}", holding.label, e)).fg(Color::Red),
                None => Cell::new(&holding.label),
            };
            let cash_flow = holding
                .metrics
                .map_or(ui::na_cell(has_error), |m| ui::signed_cell(m.monthly_cash_flow, ui::money));
            let cap_rate = holding
                .metrics
                .map_or(ui::na_cell(has_error), |m| ui::right_cell(ui::percent(m.cap_rate)));
            let cash_on_cash = match holding.metrics.and_then(|m| m.cash_on_cash_return) {
                Some(coc) => ui::signed_cell(coc, ui::percent),
                None => ui::na_cell(has_error),
            };
            table.add_row(vec![
                label,
                ui::format_optional_cell(holding.current_value, ui::money),
                ui::format_optional_cell(holding.price, ui::money),
                cash_flow,
                cap_rate,
                cash_on_cash,
            ]);
        }

        let totals = &self.totals;
        let total_style = if self.is_complete() {
            ui::StyleType::TotalValue
        } else {
            ui::StyleType::Error
        };
        let mut output = format!(
            "Portfolio: {}\n\n{}\n",
            ui::style_text(&self.name, ui::StyleType::Title),
            table
        );
        let lines = [
            ("Properties", totals.property_count.to_string()),
            ("Total value", ui::money(totals.total_value)),
            ("Cash invested", ui::money(totals.total_cash_invested)),
            ("Monthly cash flow", ui::money(totals.total_monthly_cash_flow)),
            (
                "Weighted cap rate",
                totals.weighted_cap_rate.map_or("N/A".to_string(), ui::percent),
            ),
            (
                "Weighted cash-on-cash",
                totals
                    .weighted_cash_on_cash
                    .map_or("N/A".to_string(), ui::percent),
            ),
        ];
        for (label, value) in lines {
            output.push_str(&format!(
                "\n{}: {}",
                ui::style_text(label, ui::StyleType::TotalLabel),
                ui::style_text(&value, ui::StyleType::TotalValue)
            ));
        }
        if !self.is_complete() {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text(
                    "Some properties could not be analyzed; totals cover the rest.",
                    total_style
                )
            ));
        }
        output
    }
}

async fn list(gateway: &Gateway) -> Result<()> {
    gateway
        .credentials()
        .session()
        .context("No active session; run `dealdesk login`")?;
    let page = gateway
        .portfolios()
        .list_or_empty(ListQuery::new().page(100, 0))
        .await;

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("ID"),
        ui::header_cell("Name"),
        ui::header_cell("Properties"),
        ui::header_cell("Created"),
    ]);
    for record in &page.items {
        table.add_row(vec![
            Cell::new(&record.id),
            Cell::new(&record.data.name),
            ui::right_cell(record.data.property_ids.len()),
            Cell::new(record.created_at.format("%Y-%m-%d")),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn show(gateway: &Gateway, id: &str) -> Result<()> {
    let pb = ui::new_spinner("Analyzing portfolio...");
    let summary = gateway.portfolio_summary(id).await;
    pb.finish_and_clear();
    let summary = summary.with_context(|| format!("Failed to load portfolio {id}"))?;
    println!("{}", summary.display_as_table());
    Ok(())
}

pub async fn run(gateway: &Gateway, action: PortfolioAction) -> Result<()> {
    match action {
        PortfolioAction::List => list(gateway).await,
        PortfolioAction::Show { id } => show(gateway, &id).await,
        PortfolioAction::Create { name, description } => {
            let record = gateway
                .portfolios()
                .create(Portfolio {
                    name,
                    description,
                    property_ids: Vec::new(),
                })
                .await
                .context("Failed to create portfolio")?;
            println!("Created portfolio {} ({})", record.data.name, record.id);
            Ok(())
        }
        PortfolioAction::Add { id, property_id } => {
            let record = gateway
                .attach_property(&id, &property_id)
                .await
                .with_context(|| format!("Failed to add {property_id} to portfolio {id}"))?;
            println!(
                "{} now holds {} properties",
                record.data.name,
                record.data.property_ids.len()
            );
            Ok(())
        }
        PortfolioAction::Remove { id, property_id } => {
            let record = gateway
                .detach_property(&id, &property_id)
                .await
                .with_context(|| format!("Failed to remove {property_id} from portfolio {id}"))?;
            println!(
                "{} now holds {} properties",
                record.data.name,
                record.data.property_ids.len()
            );
            Ok(())
        }
        PortfolioAction::Delete { id } => {
            gateway
                .portfolios()
                .delete(&id)
                .await
                .with_context(|| format!("Failed to delete portfolio {id}"))?;
            println!("Deleted portfolio {id}");
            Ok(())
        }
    }
}
