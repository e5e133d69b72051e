//! Rolls per-property metrics up into portfolio totals.
use crate::core::finance::{self, DerivedMetrics};
use crate::core::model::{Projection, Property};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One portfolio member with the metrics derived from its current inputs.
#[derive(Debug, Clone)]
pub struct HoldingValue {
    pub property_id: String,
    pub label: String,
    pub price: Option<f64>,
    /// Purchase price the member's cap rate is computed against.
    pub asking_price: Option<f64>,
    pub current_value: Option<f64>,
    pub metrics: Option<DerivedMetrics>,
    pub error: Option<String>,
}

impl HoldingValue {
    /// A member that could not be loaded at all.
    pub fn failed(property_id: &str, error: impl ToString) -> Self {
        HoldingValue {
            property_id: property_id.to_string(),
            label: property_id.to_string(),
            price: None,
            asking_price: None,
            current_value: None,
            metrics: None,
            error: Some(error.to_string()),
        }
    }
}

/// Portfolio-level figures. Recomputed on every read, never stored on the
/// portfolio itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioTotals {
    pub property_count: usize,
    pub total_value: f64,
    pub total_purchase_price: f64,
    pub total_cash_invested: f64,
    pub total_monthly_cash_flow: f64,
    pub total_annual_cash_flow: f64,
    /// Cap rates weighted by the purchase price each one divides by.
    #[serde(default)]
    pub weighted_cap_rate: Option<f64>,
    /// Cash-on-cash returns weighted by cash invested.
    #[serde(default)]
    pub weighted_cash_on_cash: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PortfolioSummary {
    pub name: String,
    pub holdings: Vec<HoldingValue>,
    pub totals: PortfolioTotals,
}

impl PortfolioSummary {
    /// True when every member was loaded and analyzed.
    pub fn is_complete(&self) -> bool {
        self.holdings.iter().all(|h| h.error.is_none())
    }
}

/// Derives the metrics of one member property.
///
/// A property without purchase or rental assumptions still counts towards
/// value totals, but carries an error in place of metrics.
pub fn value_holding(property_id: &str, property: &Property, projection: Projection) -> HoldingValue {
    let mut holding = HoldingValue {
        property_id: property_id.to_string(),
        label: property.address.to_string(),
        price: Some(property.price),
        asking_price: None,
        current_value: Some(property.current_value()),
        metrics: None,
        error: None,
    };

    match property.deal_inputs(projection) {
        Some(inputs) => match finance::analyze(&inputs) {
            Ok(metrics) => {
                holding.asking_price = Some(inputs.purchase_info.asking_price);
                holding.metrics = Some(metrics);
            }
            Err(e) => {
                debug!("Analysis failed for {}: {}", property_id, e);
                holding.error = Some(e.to_string());
            }
        },
        None => {
            holding.error = Some(format!(
                "Property {property_id} has no purchase or rental assumptions"
            ));
        }
    }
    holding
}

/// Combines member holdings into portfolio totals.
///
/// Values sum over every member that loaded; cash flows and weighted rates
/// over members that also produced metrics.
pub fn summarize(name: &str, holdings: Vec<HoldingValue>) -> PortfolioSummary {
    let mut totals = PortfolioTotals {
        property_count: holdings.len(),
        ..Default::default()
    };

    let mut cap_weight = 0.0;
    let mut cap_weighted_sum = 0.0;
    let mut coc_weighted_sum = 0.0;

    for holding in &holdings {
        totals.total_value += holding.current_value.unwrap_or_default();
        totals.total_purchase_price += holding.price.unwrap_or_default();

        let (Some(asking_price), Some(metrics)) = (holding.asking_price, &holding.metrics) else {
            continue;
        };
        totals.total_monthly_cash_flow += metrics.monthly_cash_flow;
        totals.total_annual_cash_flow += metrics.annual_cash_flow;
        totals.total_cash_invested += metrics.total_cash_invested;

        cap_weight += asking_price;
        cap_weighted_sum += metrics.cap_rate * asking_price;
        if let Some(coc) = metrics.cash_on_cash_return {
            coc_weighted_sum += coc * metrics.total_cash_invested;
        }
    }

    if cap_weight > 0.0 {
        totals.weighted_cap_rate = Some(cap_weighted_sum / cap_weight);
    }
    if totals.total_cash_invested != 0.0 {
        totals.weighted_cash_on_cash = Some(coc_weighted_sum / totals.total_cash_invested);
    }
    debug!(
        "Summarized {} ({} holdings): {:?}",
        name, totals.property_count, totals
    );

    PortfolioSummary {
        name: name.to_string(),
        holdings,
        totals,
    }
}
