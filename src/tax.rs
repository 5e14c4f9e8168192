//! Progressive slab tax calculator.
//!
//! A fixed, simplified slab table; not a statutory tax engine.

use crate::fields::{format_inr, Money, StructuredTaxFields};
use serde::Serialize;
use tracing::debug;

/// A bracket: income up to `upper_bound` is taxed at `rate_percent`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slab {
    pub upper_bound: Money,
    pub rate_percent: u32,
}

/// Slabs in ascending order of upper bound.
pub const SLABS: [Slab; 6] = [
    Slab { upper_bound: 300_000.0, rate_percent: 0 },
    Slab { upper_bound: 600_000.0, rate_percent: 5 },
    Slab { upper_bound: 900_000.0, rate_percent: 10 },
    Slab { upper_bound: 1_200_000.0, rate_percent: 15 },
    Slab { upper_bound: 1_500_000.0, rate_percent: 20 },
    Slab { upper_bound: Money::INFINITY, rate_percent: 30 },
];

/// Derived, read-only computation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxComputation {
    pub gross_income: Money,
    pub taxable_income: Money,
    pub deductions: Money,
    pub net_taxable: Money,
    pub total_tax: Money,
    pub tds: Money,
    pub tax_payable: Money,
}

/// Compute liability for a record. Total: never fails.
pub fn calculate(fields: &StructuredTaxFields) -> TaxComputation {
    let gross_income = fields.gross_salary + fields.other_income;
    let taxable_income = gross_income - fields.exemptions;
    let deductions = fields.section16_deductions + fields.chapter6_deductions;
    let net_taxable = (taxable_income - deductions).max(0.0);

    let total_tax = slab_tax(net_taxable);
    // TDS offsets the liability but never turns it into a refund.
    let tax_payable = (total_tax - fields.tds).max(0.0);

    debug!(
        "Tax on {} net taxable: {} (payable {})",
        format_inr(net_taxable),
        format_inr(total_tax),
        format_inr(tax_payable)
    );

    TaxComputation {
        gross_income,
        taxable_income,
        deductions,
        net_taxable,
        total_tax,
        tds: fields.tds,
        tax_payable,
    }
}

/// Marginal-rate tax: each rupee is taxed only at its own bracket's rate.
pub fn slab_tax(net_taxable: Money) -> Money {
    let mut tax = 0.0;
    let mut previous_limit = 0.0;

    for slab in SLABS {
        if net_taxable <= previous_limit {
            break;
        }
        let amount_in_slab = net_taxable.min(slab.upper_bound) - previous_limit;
        tax += amount_in_slab * slab.rate_percent as Money / 100.0;
        previous_limit = slab.upper_bound;
    }

    tax
}
