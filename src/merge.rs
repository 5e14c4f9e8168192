//! Merge extracted fields over a baseline record.

use crate::fields::{ExtractedFields, StructuredTaxFields};

/// Take each field from `extracted` when present, otherwise keep `defaults`.
///
/// No range checks happen here; merging an empty extraction returns
/// `defaults` unchanged.
pub fn merge(defaults: StructuredTaxFields, extracted: &ExtractedFields) -> StructuredTaxFields {
    let ExtractedFields {
        pan,
        assessment_year,
        employment_from,
        employment_to,
        gross_salary,
        exemptions,
        section16_deductions,
        other_income,
        chapter6_deductions,
        tds,
    } = extracted.clone();

    StructuredTaxFields {
        pan: pan.unwrap_or(defaults.pan),
        assessment_year: assessment_year.unwrap_or(defaults.assessment_year),
        employment_from: employment_from.unwrap_or(defaults.employment_from),
        employment_to: employment_to.unwrap_or(defaults.employment_to),
        gross_salary: gross_salary.unwrap_or(defaults.gross_salary),
        exemptions: exemptions.unwrap_or(defaults.exemptions),
        section16_deductions: section16_deductions.unwrap_or(defaults.section16_deductions),
        other_income: other_income.unwrap_or(defaults.other_income),
        chapter6_deductions: chapter6_deductions.unwrap_or(defaults.chapter6_deductions),
        tds: tds.unwrap_or(defaults.tds),
    }
}
