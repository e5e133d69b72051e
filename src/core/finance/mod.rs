//! Deal-level investment metrics.
//!
//! Everything here is a pure function of [`DealInputs`]. Rates are fractions
//! (0.052 means 5.2%). Ratios that would divide by zero are `None` rather
//! than zero, so a genuine 0% result stays distinguishable from "undefined".

pub mod irr;
pub mod mortgage;

use crate::core::error::CalcError;
use crate::core::model::{DealInputs, ExpenseProfile, PurchaseTerms, RentalAssumptions};
use mortgage::Loan;
use rust_decimal::{Decimal, prelude::*};
use rust_finprim::rate::cagr;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Length of the projection behind the ROI and IRR figures.
pub const HOLDING_YEARS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub monthly_cash_flow: f64,
    pub annual_cash_flow: f64,
    pub net_operating_income_monthly: f64,
    pub net_operating_income_annual: f64,
    /// `None` when there is no debt service (all-cash purchase).
    #[serde(default)]
    pub debt_service_coverage_ratio: Option<f64>,
    pub cap_rate: f64,
    /// `None` when no cash is invested.
    #[serde(default)]
    pub cash_on_cash_return: Option<f64>,
    #[serde(default)]
    pub five_year_roi: Option<f64>,
    #[serde(default)]
    pub annualized_roi: Option<f64>,
    /// `None` when the projected cash flows have no rate of return in range.
    #[serde(default)]
    pub internal_rate_of_return: Option<f64>,
    pub effective_gross_income: f64,
    pub operating_expenses: f64,
    pub monthly_mortgage_payment: f64,
    pub annual_debt_service: f64,
    pub total_cash_invested: f64,
}

/// Scheduled rent plus other income, less vacancy loss on rent. Annual.
pub fn effective_gross_income(rental: &RentalAssumptions) -> f64 {
    let gross_rent = rental.estimated_rent * 12.0;
    gross_rent + rental.other_income * 12.0 - gross_rent * rental.vacancy_rate
}

/// Annual management fee. An explicit expense entry wins over the fee
/// derived from the rental assumptions; the two are never added together.
pub fn management_fee(rental: &RentalAssumptions, expenses: &ExpenseProfile) -> f64 {
    expenses
        .property_management
        .unwrap_or(rental.estimated_rent * 12.0 * rental.management_fee_percent)
}

/// Annual operating expenses, excluding debt service and the capex reserve.
pub fn operating_expenses(rental: &RentalAssumptions, expenses: &ExpenseProfile) -> f64 {
    expenses.property_tax
        + expenses.insurance
        + expenses.maintenance
        + management_fee(rental, expenses)
        + expenses.utilities
        + expenses.hoa
        + expenses.other
}

pub fn net_operating_income(rental: &RentalAssumptions, expenses: &ExpenseProfile) -> f64 {
    effective_gross_income(rental) - operating_expenses(rental, expenses)
}

/// Down payment plus closing and rehab costs.
pub fn total_cash_invested(purchase: &PurchaseTerms) -> f64 {
    purchase.asking_price * purchase.down_payment_percent
        + purchase.closing_costs
        + purchase.estimated_rehab_cost
}

/// The acquisition loan implied by the purchase terms.
pub fn financing(purchase: &PurchaseTerms) -> Result<Loan, CalcError> {
    if !(0.0..=1.0).contains(&purchase.down_payment_percent) {
        return Err(CalcError::InvalidFinancingInput(format!(
            "down payment must be within [0, 1], got {}",
            purchase.down_payment_percent
        )));
    }
    Loan::new(
        purchase.asking_price * (1.0 - purchase.down_payment_percent),
        purchase.loan_interest_rate,
        purchase.loan_term_years,
    )
}

pub fn cap_rate(net_operating_income: f64, price: f64) -> Result<f64, CalcError> {
    if !(price.is_finite() && price > 0.0) {
        return Err(CalcError::InvalidFinancingInput(format!(
            "price must be positive, got {price}"
        )));
    }
    Ok(net_operating_income / price)
}

pub fn cash_on_cash_return(annual_cash_flow: f64, total_cash_invested: f64) -> Option<f64> {
    (total_cash_invested != 0.0).then(|| annual_cash_flow / total_cash_invested)
}

pub fn debt_service_coverage_ratio(net_operating_income: f64, annual_debt_service: f64) -> Option<f64> {
    (annual_debt_service != 0.0).then(|| net_operating_income / annual_debt_service)
}

/// Market value at the end of the holding period.
pub fn projected_value(purchase: &PurchaseTerms, appreciation_rate: f64) -> f64 {
    purchase.market_value() * (1.0 + appreciation_rate).powi(HOLDING_YEARS as i32)
}

/// Cumulative cash flow plus equity gained through appreciation, over the
/// cash invested.
pub fn five_year_roi(
    annual_cash_flow: f64,
    appreciation_gain: f64,
    total_cash_invested: f64,
) -> Option<f64> {
    let total_return = annual_cash_flow * HOLDING_YEARS as f64 + appreciation_gain;
    (total_cash_invested != 0.0).then(|| total_return / total_cash_invested)
}

/// Compound annual rate equivalent to `total_roi` earned over `years`.
///
/// `None` once the total return has wiped out the investment, where no real
/// annual rate exists.
pub fn annualized_roi(total_roi: f64, years: u32) -> Option<f64> {
    let growth = 1.0 + total_roi;
    if !(growth.is_finite() && growth > 0.0) || years == 0 {
        return None;
    }
    let end_bal = Decimal::from_f64(growth)?;
    let rate = cagr(Decimal::ONE, end_bal, Decimal::from(years));
    debug!("cagr: 1 -> {end_bal} over {years}y = {rate}");
    rate.to_f64()
}

/// Yearly equity cash flows: the initial outlay, four operating years, and a
/// final year that adds the net proceeds of selling.
pub fn cash_flow_series(inputs: &DealInputs) -> Result<Vec<f64>, CalcError> {
    let loan = financing(&inputs.purchase_info)?;
    let noi = net_operating_income(&inputs.rental_info, &inputs.expenses);
    let annual_cash_flow = noi - loan.annual_debt_service() - inputs.expenses.capex_reserve;

    let sale_price = projected_value(&inputs.purchase_info, inputs.projection.appreciation_rate);
    let net_sale_proceeds = sale_price * (1.0 - inputs.projection.selling_cost_rate)
        - loan.balance_after(HOLDING_YEARS * 12);

    let mut flows = Vec::with_capacity(HOLDING_YEARS as usize + 1);
    flows.push(-total_cash_invested(&inputs.purchase_info));
    for _ in 1..HOLDING_YEARS {
        flows.push(annual_cash_flow);
    }
    flows.push(annual_cash_flow + net_sale_proceeds);
    Ok(flows)
}

/// Computes every derived metric for one deal.
pub fn analyze(inputs: &DealInputs) -> Result<DerivedMetrics, CalcError> {
    inputs
        .validate()
        .map_err(CalcError::InvalidFinancingInput)?;

    let purchase = &inputs.purchase_info;
    let loan = financing(purchase)?;

    let effective_gross_income = effective_gross_income(&inputs.rental_info);
    let operating_expenses = operating_expenses(&inputs.rental_info, &inputs.expenses);
    let noi = effective_gross_income - operating_expenses;

    let monthly_mortgage_payment = loan.monthly_payment();
    let annual_debt_service = loan.annual_debt_service();
    let annual_cash_flow = noi - annual_debt_service - inputs.expenses.capex_reserve;
    let invested = total_cash_invested(purchase);

    let appreciation_gain =
        projected_value(purchase, inputs.projection.appreciation_rate) - purchase.asking_price;
    let five_year_roi = five_year_roi(annual_cash_flow, appreciation_gain, invested);
    let annualized_roi = five_year_roi.and_then(|roi| annualized_roi(roi, HOLDING_YEARS));

    let internal_rate_of_return = if invested > 0.0 {
        match irr::irr(&cash_flow_series(inputs)?) {
            Ok(rate) => Some(rate),
            Err(e) => {
                debug!("IRR unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    Ok(DerivedMetrics {
        monthly_cash_flow: annual_cash_flow / 12.0,
        annual_cash_flow,
        net_operating_income_monthly: noi / 12.0,
        net_operating_income_annual: noi,
        debt_service_coverage_ratio: debt_service_coverage_ratio(noi, annual_debt_service),
        cap_rate: cap_rate(noi, purchase.asking_price)?,
        cash_on_cash_return: cash_on_cash_return(annual_cash_flow, invested),
        five_year_roi,
        annualized_roi,
        internal_rate_of_return,
        effective_gross_income,
        operating_expenses,
        monthly_mortgage_payment,
        annual_debt_service,
        total_cash_invested: invested,
    })
}
