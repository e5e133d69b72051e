use super::ui;
use crate::core::gateway::Gateway;
use crate::core::model::{Property, PropertyType, Record};
use crate::core::query::{Condition, ListQuery, Page, PageRequest, SortKey};
use anyhow::{Context, Result};
use comfy_table::Cell;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Best search score first.
    #[default]
    Relevance,
    PriceAsc,
    PriceDesc,
}

impl SortOrder {
    fn key(self) -> SortKey {
        match self {
            SortOrder::Relevance => SortKey::desc("relevance_score"),
            SortOrder::PriceAsc => SortKey::asc("price"),
            SortOrder::PriceDesc => SortKey::desc("price"),
        }
    }
}

/// Property search criteria. Unset criteria do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchArgs {
    /// Matched against the city.
    pub location: Option<String>,
    pub property_type: Option<PropertyType>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_bedrooms: Option<u32>,
    pub min_bathrooms: Option<f64>,
    pub min_square_feet: Option<u32>,
    pub sort: SortOrder,
    pub page_size: usize,
    /// 1-based.
    pub page: usize,
}

impl SearchArgs {
    pub fn query(&self) -> ListQuery {
        let mut query = ListQuery::new();
        if let Some(location) = &self.location {
            query = query.filter(Condition::contains("address.city", location.as_str()));
        }
        if let Some(property_type) = self.property_type {
            query = query.filter(Condition::eq("property_type", property_type.to_string()));
        }
        if let Some(min) = self.min_price {
            query = query.filter(Condition::gte("price", min));
        }
        if let Some(max) = self.max_price {
            query = query.filter(Condition::lte("price", max));
        }
        if let Some(beds) = self.min_bedrooms {
            query = query.filter(Condition::gte("bedrooms", beds));
        }
        if let Some(baths) = self.min_bathrooms {
            query = query.filter(Condition::gte("bathrooms", baths));
        }
        if let Some(sqft) = self.min_square_feet {
            query = query.filter(Condition::gte("square_feet", sqft));
        }
        let page = PageRequest::for_page(self.page_size.max(1), self.page);
        query.sort_by(self.sort.key()).page(page.limit, page.offset)
    }
}

pub fn display_results(page: &Page<Record<Property>>) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("ID"),
        ui::header_cell("Address"),
        ui::header_cell("Type"),
        ui::header_cell("Price"),
        ui::header_cell("Beds"),
        ui::header_cell("Baths"),
        ui::header_cell("Sq Ft"),
        ui::header_cell("Score"),
    ]);

    for record in &page.items {
        let property = &record.data;
        table.add_row(vec![
            Cell::new(&record.id),
            Cell::new(property.address.to_string()),
            Cell::new(property.property_type.to_string()),
            ui::right_cell(ui::money(property.price)),
            ui::right_cell(property.bedrooms),
            ui::right_cell(property.bathrooms),
            ui::format_optional_cell(property.square_feet, |s| s.to_string()),
            ui::format_optional_cell(property.relevance_score, |s| format!("{s:.0}")),
        ]);
    }

    let shown_to = page.offset + page.items.len();
    let footer = if page.items.is_empty() {
        "No matching properties".to_string()
    } else {
        format!("Showing {}-{} of {}", page.offset + 1, shown_to, page.total)
    };
    format!(
        "{}\n{}",
        table,
        ui::style_text(&footer, ui::StyleType::Subtle)
    )
}

pub async fn run(gateway: &Gateway, args: &SearchArgs) -> Result<()> {
    gateway
        .credentials()
        .session()
        .context("No active session; run `dealdesk login`")?;
    let page = gateway.properties().list_or_empty(args.query()).await;
    println!("{}", display_results(&page));
    Ok(())
}
