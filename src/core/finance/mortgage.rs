//! Fixed-rate amortizing loan math.

use crate::core::error::CalcError;

/// Longest loan term accepted, in years.
pub const MAX_TERM_YEARS: u32 = 100;

/// A fully amortizing fixed-rate loan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Loan {
    pub principal: f64,
    pub annual_rate: f64,
    pub term_years: u32,
}

impl Loan {
    /// Checks the terms. A zero principal needs no rate or term.
    pub fn new(principal: f64, annual_rate: f64, term_years: u32) -> Result<Self, CalcError> {
        if !(principal.is_finite() && principal >= 0.0) {
            return Err(CalcError::InvalidFinancingInput(format!(
                "loan amount must not be negative, got {principal}"
            )));
        }
        if principal > 0.0 {
            if !(annual_rate.is_finite() && annual_rate >= 0.0) {
                return Err(CalcError::InvalidFinancingInput(format!(
                    "interest rate must not be negative, got {annual_rate}"
                )));
            }
            if term_years == 0 {
                return Err(CalcError::InvalidFinancingInput(
                    "loan term must be at least one year".to_string(),
                ));
            }
            if term_years > MAX_TERM_YEARS {
                return Err(CalcError::InvalidFinancingInput(format!(
                    "loan term must not exceed {MAX_TERM_YEARS} years, got {term_years}"
                )));
            }
        }
        Ok(Self {
            principal,
            annual_rate,
            term_years,
        })
    }

    fn monthly_rate(&self) -> f64 {
        self.annual_rate / 12.0
    }

    fn months(&self) -> u32 {
        self.term_years.saturating_mul(12)
    }

    /// Level monthly payment: `P·r / (1 − (1+r)^−n)`, or `P/n` at zero rate.
    pub fn monthly_payment(&self) -> f64 {
        if self.principal == 0.0 {
            return 0.0;
        }
        let n = self.months() as f64;
        let r = self.monthly_rate();
        if r == 0.0 {
            return self.principal / n;
        }
        self.principal * r / (1.0 - (1.0 + r).powf(-n))
    }

    pub fn annual_debt_service(&self) -> f64 {
        self.monthly_payment() * 12.0
    }

    /// Outstanding principal after `payments` monthly installments.
    pub fn balance_after(&self, payments: u32) -> f64 {
        if self.principal == 0.0 || payments >= self.months() {
            return 0.0;
        }
        let k = payments as f64;
        let r = self.monthly_rate();
        let payment = self.monthly_payment();
        let balance = if r == 0.0 {
            self.principal - payment * k
        } else {
            let growth = (1.0 + r).powf(k);
            self.principal * growth - payment * (growth - 1.0) / r
        };
        balance.max(0.0)
    }
}
