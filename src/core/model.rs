//! Entity records and the deal inputs they carry.

use crate::core::aggregate::PortfolioTotals;
use crate::core::finance::DerivedMetrics;
use crate::core::finance::mortgage::MAX_TERM_YEARS;
use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Property,
    Analysis,
    Portfolio,
    Report,
    User,
    /// Regional market data. Readable by every user, owned by none.
    Market,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                EntityKind::Property => "property",
                EntityKind::Analysis => "analysis",
                EntityKind::Portfolio => "portfolio",
                EntityKind::Report => "report",
                EntityKind::User => "user",
                EntityKind::Market => "market",
            }
        )
    }
}

impl EntityKind {
    /// Plural name used for REST paths and list envelopes.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Property => "properties",
            EntityKind::Analysis => "analyses",
            EntityKind::Portfolio => "portfolios",
            EntityKind::Report => "reports",
            EntityKind::User => "users",
            EntityKind::Market => "markets",
        }
    }

    /// Row-store table name.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::User => "profiles",
            EntityKind::Market => "market_data",
            other => other.collection(),
        }
    }

    /// Column that scopes a row to its owner, if rows are owned at all.
    pub fn owner_column(&self) -> Option<&'static str> {
        match self {
            EntityKind::User => Some("id"),
            EntityKind::Market => None,
            _ => Some("user_id"),
        }
    }
}

/// A stored entity: identity and ownership beside the caller-supplied payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: String,
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub data: T,
}

// ---------------------------------------------------------------------------
// Property and deal inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {} {}", self.street, self.city, self.state, self.zip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    SingleFamily,
    MultiFamily,
    Condo,
    Townhouse,
    Commercial,
    Land,
    Other,
}

impl Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PropertyType::SingleFamily => "single_family",
                PropertyType::MultiFamily => "multi_family",
                PropertyType::Condo => "condo",
                PropertyType::Townhouse => "townhouse",
                PropertyType::Commercial => "commercial",
                PropertyType::Land => "land",
                PropertyType::Other => "other",
            }
        )
    }
}

impl FromStr for PropertyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "single_family" => Ok(PropertyType::SingleFamily),
            "multi_family" => Ok(PropertyType::MultiFamily),
            "condo" => Ok(PropertyType::Condo),
            "townhouse" => Ok(PropertyType::Townhouse),
            "commercial" => Ok(PropertyType::Commercial),
            "land" => Ok(PropertyType::Land),
            "other" => Ok(PropertyType::Other),
            _ => Err(anyhow!("Invalid property type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseTerms {
    pub asking_price: f64,
    /// After-repair value; the asking price stands in when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_market_value: Option<f64>,
    #[serde(default)]
    pub estimated_rehab_cost: f64,
    #[serde(default)]
    pub closing_costs: f64,
    pub down_payment_percent: f64,
    pub loan_interest_rate: f64,
    pub loan_term_years: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_closing_date: Option<NaiveDate>,
}

impl PurchaseTerms {
    pub fn market_value(&self) -> f64 {
        self.estimated_market_value
            .filter(|v| *v > 0.0)
            .unwrap_or(self.asking_price)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.asking_price.is_finite() && self.asking_price > 0.0) {
            return Err(format!(
                "asking_price must be positive, got {}",
                self.asking_price
            ));
        }
        check_fraction("down_payment_percent", self.down_payment_percent)?;
        // Loan terms only matter when something is borrowed.
        if self.down_payment_percent < 1.0 && !(self.loan_interest_rate >= 0.0) {
            return Err(format!(
                "loan_interest_rate must not be negative, got {}",
                self.loan_interest_rate
            ));
        }
        if self.down_payment_percent < 1.0 && self.loan_term_years > MAX_TERM_YEARS {
            return Err(format!(
                "loan_term_years must not exceed {MAX_TERM_YEARS}, got {}",
                self.loan_term_years
            ));
        }
        check_non_negative("estimated_rehab_cost", self.estimated_rehab_cost)?;
        check_non_negative("closing_costs", self.closing_costs)?;
        if let Some(value) = self.estimated_market_value {
            check_non_negative("estimated_market_value", value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalAssumptions {
    /// Monthly.
    pub estimated_rent: f64,
    /// Monthly.
    #[serde(default)]
    pub other_income: f64,
    pub vacancy_rate: f64,
    #[serde(default)]
    pub management_fee_percent: f64,
}

impl RentalAssumptions {
    pub fn validate(&self) -> Result<(), String> {
        check_non_negative("estimated_rent", self.estimated_rent)?;
        check_non_negative("other_income", self.other_income)?;
        check_fraction("vacancy_rate", self.vacancy_rate)?;
        check_fraction("management_fee_percent", self.management_fee_percent)
    }
}

/// Annual operating costs in dollars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseProfile {
    #[serde(default)]
    pub property_tax: f64,
    #[serde(default)]
    pub insurance: f64,
    #[serde(default)]
    pub maintenance: f64,
    /// When set, replaces the fee derived from `management_fee_percent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_management: Option<f64>,
    #[serde(default)]
    pub utilities: f64,
    #[serde(default)]
    pub hoa: f64,
    #[serde(default)]
    pub other: f64,
    #[serde(default)]
    pub capex_reserve: f64,
}

impl ExpenseProfile {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("property_tax", self.property_tax),
            ("insurance", self.insurance),
            ("maintenance", self.maintenance),
            ("property_management", self.property_management.unwrap_or(0.0)),
            ("utilities", self.utilities),
            ("hoa", self.hoa),
            ("other", self.other),
            ("capex_reserve", self.capex_reserve),
        ] {
            check_non_negative(name, value)?;
        }
        Ok(())
    }
}

/// Forward-looking assumptions for the five-year figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(default)]
    pub appreciation_rate: f64,
    /// Fraction of the sale price lost to commissions and fees at exit.
    #[serde(default)]
    pub selling_cost_rate: f64,
}

impl Projection {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.appreciation_rate > -1.0) {
            return Err(format!(
                "appreciation_rate must be above -1, got {}",
                self.appreciation_rate
            ));
        }
        check_fraction("selling_cost_rate", self.selling_cost_rate)
    }
}

/// Everything the calculator needs for one deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealInputs {
    pub purchase_info: PurchaseTerms,
    pub rental_info: RentalAssumptions,
    #[serde(default)]
    pub expenses: ExpenseProfile,
    #[serde(default)]
    pub projection: Projection,
}

impl DealInputs {
    pub fn validate(&self) -> Result<(), String> {
        self.purchase_info.validate()?;
        self.rental_info.validate()?;
        self.expenses.validate()?;
        self.projection.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub address: Address,
    pub property_type: PropertyType,
    pub price: f64,
    #[serde(default)]
    pub bedrooms: u32,
    #[serde(default)]
    pub bathrooms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub square_feet: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_built: Option<u16>,
    /// Acres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Search ranking score; listings sort on it, highest first.
    #[serde(default, alias = "ai_score", skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_info: Option<PurchaseTerms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rental_info: Option<RentalAssumptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expenses: Option<ExpenseProfile>,
}

impl Property {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.price.is_finite() && self.price > 0.0) {
            return Err(format!("price must be positive, got {}", self.price));
        }
        check_non_negative("bathrooms", self.bathrooms)?;
        if let Some(lot) = self.lot_size {
            check_non_negative("lot_size", lot)?;
        }
        if let Some(p) = &self.purchase_info {
            p.validate()?;
        }
        if let Some(r) = &self.rental_info {
            r.validate()?;
        }
        if let Some(e) = &self.expenses {
            e.validate()?;
        }
        Ok(())
    }

    /// Assembles calculator inputs, or `None` when the listing carries no
    /// purchase or rental assumptions.
    pub fn deal_inputs(&self, projection: Projection) -> Option<DealInputs> {
        Some(DealInputs {
            purchase_info: self.purchase_info.clone()?,
            rental_info: self.rental_info.clone()?,
            expenses: self.expenses.clone().unwrap_or_default(),
            projection,
        })
    }

    /// Value used for portfolio totals.
    pub fn current_value(&self) -> f64 {
        self.purchase_info
            .as_ref()
            .and_then(|p| p.estimated_market_value)
            .filter(|v| *v > 0.0)
            .unwrap_or(self.price)
    }
}

// ---------------------------------------------------------------------------
// Portfolio, analysis, report, user
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub property_ids: Vec<String>,
}

impl Portfolio {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("portfolio name must not be empty".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for id in &self.property_ids {
            if !seen.insert(id) {
                return Err(format!("property '{id}' listed twice"));
            }
        }
        Ok(())
    }
}

/// What a report describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "report_type", rename_all = "snake_case")]
pub enum Subject {
    Property { property_id: String },
    Portfolio { portfolio_id: String },
    Market { city: String, state: String },
}

impl Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Property { property_id } => write!(f, "property {property_id}"),
            Subject::Portfolio { portfolio_id } => write!(f, "portfolio {portfolio_id}"),
            Subject::Market { city, state } => write!(f, "market {city}, {state}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Scheduled,
    InProgress,
    Completed,
}

impl Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ReportStatus::Scheduled => "scheduled",
                ReportStatus::InProgress => "in_progress",
                ReportStatus::Completed => "completed",
            }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Pdf,
    Csv,
    Xlsx,
}

impl Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ReportFormat::Pdf => "pdf",
                ReportFormat::Csv => "csv",
                ReportFormat::Xlsx => "xlsx",
            }
        )
    }
}

impl FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pdf" => Ok(ReportFormat::Pdf),
            "csv" => Ok(ReportFormat::Csv),
            "xlsx" => Ok(ReportFormat::Xlsx),
            _ => Err(anyhow!("Invalid report format: {}", s)),
        }
    }
}

/// Metrics frozen into a report when it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Snapshot {
    Property(DerivedMetrics),
    Portfolio(PortfolioTotals),
    Market(MarketDetail),
}

/// A saved deal analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub inputs: DealInputs,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<DerivedMetrics>,
}

impl Analysis {
    pub fn validate(&self) -> Result<(), String> {
        self.inputs.validate()?;
        if self.status == ReportStatus::Completed && self.metrics.is_none() {
            return Err("a completed analysis needs its metrics snapshot".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    #[serde(flatten)]
    pub subject: Subject,
    #[serde(default)]
    pub format: ReportFormat,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    /// When a scheduled report is due to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Report {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("report name must not be empty".to_string());
        }
        if self.status == ReportStatus::Scheduled && self.scheduled_for.is_none() {
            return Err("a scheduled report needs a run time".to_string());
        }
        Ok(())
    }
}

/// Parameters of a "generate report" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    #[serde(flatten)]
    pub subject: Subject,
    #[serde(default)]
    pub format: ReportFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "investor".to_string()
}

impl User {
    pub fn validate(&self) -> Result<(), String> {
        if !self.email.contains('@') {
            return Err(format!("'{}' is not an email address", self.email));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Property analysis and market intelligence
// ---------------------------------------------------------------------------

/// Headline return figures as served with a property analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMetrics {
    #[serde(default)]
    pub cap_rate: Option<f64>,
    #[serde(default)]
    pub cash_on_cash_return: Option<f64>,
    #[serde(default)]
    pub five_year_roi: Option<f64>,
    #[serde(default)]
    pub internal_rate_of_return: Option<f64>,
}

impl From<&DerivedMetrics> for KeyMetrics {
    fn from(m: &DerivedMetrics) -> Self {
        KeyMetrics {
            cap_rate: Some(m.cap_rate),
            cash_on_cash_return: m.cash_on_cash_return,
            five_year_roi: m.five_year_roi,
            internal_rate_of_return: m.internal_rate_of_return,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_risk_score: f64,
    #[serde(default)]
    pub vacancy_risk: String,
    #[serde(default)]
    pub market_volatility: String,
    #[serde(default)]
    pub property_condition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyAnalysis {
    pub financial_metrics: KeyMetrics,
    #[serde(default)]
    pub risk_assessment: Option<RiskAssessment>,
    #[serde(default)]
    pub opportunity_score: Option<f64>,
    #[serde(default)]
    pub ai_recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrend {
    pub city: String,
    #[serde(alias = "priceChange")]
    pub price_change: f64,
    #[serde(alias = "rentChange")]
    pub rent_change: f64,
    #[serde(alias = "capRate")]
    pub cap_rate: f64,
    #[serde(default)]
    pub inventory: String,
    #[serde(default)]
    pub demand: String,
    #[serde(default)]
    pub forecast: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergingMarket {
    pub city: String,
    #[serde(alias = "growthPotential")]
    pub growth_potential: String,
    #[serde(default)]
    pub affordability: String,
    #[serde(alias = "jobGrowth")]
    pub job_growth: f64,
    #[serde(alias = "population")]
    pub population_growth: f64,
    #[serde(alias = "aiScore")]
    pub ai_score: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendWindow {
    #[serde(default)]
    pub one_month: f64,
    #[serde(default)]
    pub three_month: f64,
    #[serde(default)]
    pub one_year: f64,
    #[serde(default)]
    pub five_year: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EconomicIndicators {
    #[serde(default)]
    pub unemployment_rate: f64,
    #[serde(default)]
    pub job_growth: f64,
    #[serde(default)]
    pub income_growth: f64,
    #[serde(default)]
    pub population_growth: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketForecast {
    #[serde(default)]
    pub price_appreciation: f64,
    #[serde(default)]
    pub rent_growth: f64,
    #[serde(default)]
    pub vacancy_rate: f64,
    #[serde(default)]
    pub confidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDetail {
    pub city: String,
    pub state: String,
    #[serde(default)]
    pub population: u64,
    pub median_home_price: f64,
    pub median_rent: f64,
    #[serde(default)]
    pub price_to_rent_ratio: f64,
    #[serde(default)]
    pub price_trends: TrendWindow,
    #[serde(default)]
    pub rent_trends: TrendWindow,
    #[serde(default)]
    pub economic_indicators: EconomicIndicators,
    #[serde(default)]
    pub forecast: MarketForecast,
}

fn check_fraction(name: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{name} must be within [0, 1], got {value}"))
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(format!("{name} must not be negative, got {value}"))
    }
}
