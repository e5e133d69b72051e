use super::ui;
use crate::core::finance::{self, DerivedMetrics};
use crate::core::gateway::Gateway;
use crate::core::model::{Analysis, DealInputs, PropertyAnalysis, ReportStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::Cell;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What to analyze.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeTarget {
    /// A deal described in a YAML file, optionally saved under a name.
    Deal {
        path: PathBuf,
        save_as: Option<String>,
    },
    /// A stored property, analyzed by the backend.
    Property(String),
}

pub fn load_deal(path: &Path) -> Result<DealInputs> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read deal file: {}", path.display()))?;
    let inputs: DealInputs = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse deal file: {}", path.display()))?;
    debug!("Loaded deal inputs: {inputs:#?}");
    Ok(inputs)
}

impl DerivedMetrics {
    pub fn display_as_table(&self, title: &str) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![ui::header_cell("Metric"), ui::header_cell("Value")]);

        let rows: Vec<(&str, Cell)> = vec![
            ("Effective gross income (yr)", ui::right_cell(ui::money(self.effective_gross_income))),
            ("Operating expenses (yr)", ui::right_cell(ui::money(self.operating_expenses))),
            ("Net operating income (yr)", ui::right_cell(ui::money(self.net_operating_income_annual))),
            ("Mortgage payment (mo)", ui::right_cell(ui::money(self.monthly_mortgage_payment))),
            ("Cash flow (mo)", ui::signed_cell(self.monthly_cash_flow, ui::money)),
            ("Cash flow (yr)", ui::signed_cell(self.annual_cash_flow, ui::money)),
            ("Cash invested", ui::right_cell(ui::money(self.total_cash_invested))),
            ("Cap rate", ui::right_cell(ui::percent(self.cap_rate))),
            ("Cash-on-cash return", ui::format_optional_cell(self.cash_on_cash_return, ui::percent)),
            ("Debt service coverage", ui::format_optional_cell(self.debt_service_coverage_ratio, |d| format!("{d:.2}x"))),
            ("5-year ROI", ui::format_optional_cell(self.five_year_roi, ui::percent)),
            ("Annualized ROI", ui::format_optional_cell(self.annualized_roi, ui::percent)),
            ("IRR", ui::format_optional_cell(self.internal_rate_of_return, ui::percent)),
        ];
        for (label, value) in rows {
            table.add_row(vec![Cell::new(label), value]);
        }

        format!(
            "{}\n\n{}",
            ui::style_text(title, ui::StyleType::Title),
            table
        )
    }
}

impl PropertyAnalysis {
    pub fn display_as_table(&self, property_id: &str) -> String {
        let metrics = &self.financial_metrics;
        let mut table = ui::new_styled_table();
        table.set_header(vec![ui::header_cell("Metric"), ui::header_cell("Value")]);
        table.add_row(vec![
            Cell::new("Cap rate"),
            ui::format_optional_cell(metrics.cap_rate, ui::percent),
        ]);
        table.add_row(vec![
            Cell::new("Cash-on-cash return"),
            ui::format_optional_cell(metrics.cash_on_cash_return, ui::percent),
        ]);
        table.add_row(vec![
            Cell::new("5-year ROI"),
            ui::format_optional_cell(metrics.five_year_roi, ui::percent),
        ]);
        table.add_row(vec![
            Cell::new("IRR"),
            ui::format_optional_cell(metrics.internal_rate_of_return, ui::percent),
        ]);
        table.add_row(vec![
            Cell::new("Opportunity score"),
            ui::format_optional_cell(self.opportunity_score, |s| format!("{s:.1}/10")),
        ]);
        if let Some(risk) = &self.risk_assessment {
            table.add_row(vec![
                Cell::new("Risk score"),
                ui::right_cell(format!("{:.1}/10", risk.overall_risk_score)),
            ]);
            table.add_row(vec![Cell::new("Vacancy risk"), ui::right_cell(&risk.vacancy_risk)]);
            table.add_row(vec![
                Cell::new("Market volatility"),
                ui::right_cell(&risk.market_volatility),
            ]);
            table.add_row(vec![
                Cell::new("Property condition"),
                ui::right_cell(&risk.property_condition),
            ]);
        }

        let mut output = format!(
            "{}\n\n{}",
            ui::style_text(&format!("Analysis of {property_id}"), ui::StyleType::Title),
            table
        );
        if !self.ai_recommendations.is_empty() {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text("Recommendations", ui::StyleType::TotalLabel)
            ));
            for recommendation in &self.ai_recommendations {
                output.push_str(&format!("\n  • {recommendation}"));
            }
        }
        output
    }
}

pub async fn run(gateway: &Gateway, target: AnalyzeTarget) -> Result<()> {
    match target {
        AnalyzeTarget::Deal { path, save_as } => {
            let inputs = load_deal(&path)?;
            // Deal files are analyzed locally; no session needed unless saving.
            let metrics = finance::analyze(&inputs).context("Failed to analyze deal")?;
            let title = save_as
                .clone()
                .unwrap_or_else(|| path.display().to_string());
            println!("{}", metrics.display_as_table(&title));

            if let Some(name) = save_as {
                let analysis = Analysis {
                    name: Some(name),
                    property_id: None,
                    inputs,
                    status: ReportStatus::Completed,
                    generated_at: Some(Utc::now()),
                    metrics: Some(metrics),
                };
                let saved = gateway
                    .analyses()
                    .create(analysis)
                    .await
                    .context("Failed to save analysis")?;
                println!(
                    "\n{}",
                    ui::style_text(&format!("Saved as {}", saved.id), ui::StyleType::Subtle)
                );
            }
        }
        AnalyzeTarget::Property(property_id) => {
            let analysis = gateway
                .property_analysis(&property_id)
                .await
                .with_context(|| format!("Failed to analyze property {property_id}"))?;
            println!("{}", analysis.display_as_table(&property_id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::finance::tests::scenario_inputs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_deal_file() -> Result<()> {
        let file = NamedTempFile::new()?;
        std::fs::write(
            file.path(),
            r#"
purchase_info:
  asking_price: 450000
  down_payment_percent: 0.2
  loan_interest_rate: 0.0425
  loan_term_years: 30
rental_info:
  estimated_rent: 2600
  vacancy_rate: 0.05
  management_fee_percent: 0.08
expenses:
  property_tax: 5400
  insurance: 1800
  maintenance: 2700
  capex_reserve: 1560
"#,
        )?;
        let inputs = load_deal(file.path())?;
        assert_eq!(inputs.purchase_info.loan_term_years, 30);
        assert_eq!(inputs.expenses.capex_reserve, 1560.0);
        assert!(inputs.expenses.property_management.is_none());

        let metrics = finance::analyze(&inputs)?;
        assert!((metrics.net_operating_income_annual - 17244.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_missing_deal_file() {
        let err = load_deal(Path::new("/nonexistent/deal.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read deal file"));
    }

    #[test]
    fn test_metrics_table_lists_undefined_ratios_as_na() -> Result<()> {
        let mut inputs = scenario_inputs();
        inputs.purchase_info.down_payment_percent = 1.0;
        let metrics = finance::analyze(&inputs)?;
        let output = metrics.display_as_table("All cash");
        assert!(output.contains("Debt service coverage"));
        assert!(output.contains("N/A"));
        assert!(output.contains("$17,244"));
        Ok(())
    }
}
