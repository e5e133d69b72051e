use super::ui;
use crate::core::gateway::{Gateway, or_default};
use crate::core::model::{EmergingMarket, MarketDetail, MarketTrend};
use anyhow::{Context, Result};
use comfy_table::Cell;

/// Market trend rows carry fractional changes.
pub fn display_trends(trends: &[MarketTrend]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Market"),
        ui::header_cell("Price Change"),
        ui::header_cell("Rent Change"),
        ui::header_cell("Cap Rate"),
        ui::header_cell("Inventory"),
        ui::header_cell("Demand"),
        ui::header_cell("Forecast"),
    ]);
    for trend in trends {
        table.add_row(vec![
            Cell::new(&trend.city),
            ui::signed_cell(trend.price_change, ui::percent),
            ui::signed_cell(trend.rent_change, ui::percent),
            ui::right_cell(ui::percent(trend.cap_rate)),
            Cell::new(&trend.inventory),
            Cell::new(&trend.demand),
            Cell::new(&trend.forecast),
        ]);
    }
    format!(
        "{}\n\n{}",
        ui::style_text("Market Trends", ui::StyleType::Title),
        table
    )
}

pub fn display_emerging(markets: &[EmergingMarket]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Market"),
        ui::header_cell("Growth Potential"),
        ui::header_cell("Affordability"),
        ui::header_cell("Job Growth"),
        ui::header_cell("Population Growth"),
        ui::header_cell("Score"),
    ]);
    for market in markets {
        table.add_row(vec![
            Cell::new(&market.city),
            Cell::new(&market.growth_potential),
            Cell::new(&market.affordability),
            ui::signed_cell(market.job_growth, ui::percent),
            ui::signed_cell(market.population_growth, ui::percent),
            ui::right_cell(format!("{:.0}", market.ai_score)),
        ]);
    }
    format!(
        "{}\n\n{}",
        ui::style_text("Emerging Markets", ui::StyleType::Title),
        table
    )
}

impl MarketDetail {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell(""),
            ui::header_cell("1 Month"),
            ui::header_cell("3 Months"),
            ui::header_cell("1 Year"),
            ui::header_cell("5 Years"),
        ]);
        for (label, window) in [("Prices", &self.price_trends), ("Rents", &self.rent_trends)] {
            table.add_row(vec![
                Cell::new(label),
                ui::signed_cell(window.one_month, ui::percent),
                ui::signed_cell(window.three_month, ui::percent),
                ui::signed_cell(window.one_year, ui::percent),
                ui::signed_cell(window.five_year, ui::percent),
            ]);
        }

        let economy = &self.economic_indicators;
        let facts = [
            ("Population", self.population.to_string()),
            ("Median home price", ui::money(self.median_home_price)),
            ("Median rent", ui::money(self.median_rent)),
            ("Price-to-rent ratio", format!("{:.1}", self.price_to_rent_ratio)),
            ("Unemployment", ui::percent(economy.unemployment_rate)),
            ("Job growth", ui::percent(economy.job_growth)),
            ("Income growth", ui::percent(economy.income_growth)),
            ("Forecast appreciation", ui::percent(self.forecast.price_appreciation)),
            ("Forecast rent growth", ui::percent(self.forecast.rent_growth)),
            ("Forecast confidence", self.forecast.confidence.clone()),
        ];

        let mut output = format!(
            "{}\n",
            ui::style_text(&format!("{}, {}", self.city, self.state), ui::StyleType::Title)
        );
        for (label, value) in facts {
            output.push_str(&format!(
                "\n{}: {}",
                ui::style_text(label, ui::StyleType::TotalLabel),
                value
            ));
        }
        output.push_str(&format!("\n\n{table}"));
        output
    }
}

/// Overview of all markets, or the detail of one when a city is given.
pub async fn run(gateway: &Gateway, location: Option<(String, String)>) -> Result<()> {
    gateway
        .credentials()
        .session()
        .context("No active session; run `dealdesk login`")?;

    match location {
        Some((city, state)) => {
            let detail = gateway
                .market_detail(&city, &state)
                .await
                .with_context(|| format!("Failed to load market data for {city}, {state}"))?;
            println!("{}", detail.display_as_table());
        }
        None => {
            let (trends, emerging) =
                futures::join!(gateway.market_trends(), gateway.emerging_markets());
            println!("{}", display_trends(&or_default(trends, "market trends")));
            ui::print_separator();
            println!(
                "{}",
                display_emerging(&or_default(emerging, "emerging markets"))
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_table_renders_percentages() {
        let trends = vec![MarketTrend {
            city: "Austin, TX".to_string(),
            price_change: 0.082,
            rent_change: -0.01,
            cap_rate: 0.048,
            inventory: "Low".to_string(),
            demand: "High".to_string(),
            forecast: "Strong growth".to_string(),
        }];
        let output = display_trends(&trends);
        assert!(output.contains("8.20%"));
        assert!(output.contains("-1.00%"));
        assert!(output.contains("4.80%"));
    }
}
