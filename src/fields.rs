//! Form 16 field record types.
//!
//! [`StructuredTaxFields`] is the fully populated record the calculator reads.
//! [`ExtractedFields`] is the best-effort subset recovered from model output,
//! with every field optional and parsed leniently from whatever JSON the model
//! produced.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;

/// Monetary amount in rupees.
pub type Money = f64;

/// Assessment years the form accepts, latest first.
pub const SUPPORTED_ASSESSMENT_YEARS: [i32; 3] = [2024, 2023, 2022];

pub const PAN_MAX_CHARS: usize = 10;

/// JSON keys of the record, in prompt order.
pub const FIELD_KEYS: [&str; 10] = [
    "pan",
    "assessment_year",
    "employment_from",
    "employment_to",
    "gross_salary",
    "exemptions",
    "section16_deductions",
    "other_income",
    "chapter6_deductions",
    "tds",
];

/// Canonical salary statement record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredTaxFields {
    pub pan: String,
    pub assessment_year: i32,
    pub employment_from: NaiveDate,
    pub employment_to: NaiveDate,
    pub gross_salary: Money,
    pub exemptions: Money,
    pub section16_deductions: Money,
    pub other_income: Money,
    pub chapter6_deductions: Money,
    pub tds: Money,
}

impl Default for StructuredTaxFields {
    /// A fresh baseline record: FY 2023-24, everything else zero.
    fn default() -> Self {
        Self {
            pan: String::new(),
            assessment_year: SUPPORTED_ASSESSMENT_YEARS[0],
            employment_from: NaiveDate::from_ymd_opt(2023, 4, 1).unwrap_or_default(),
            employment_to: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap_or_default(),
            gross_salary: 0.0,
            exemptions: 0.0,
            section16_deductions: 0.0,
            other_income: 0.0,
            chapter6_deductions: 0.0,
            tds: 0.0,
        }
    }
}

/// A problem with a record as entered or edited by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

impl StructuredTaxFields {
    /// Check the record the way the filing form does. Never mutates.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.pan.chars().count() > PAN_MAX_CHARS {
            issues.push(ValidationIssue {
                field: "pan",
                message: format!("must be at most {} characters", PAN_MAX_CHARS),
            });
        }

        if !SUPPORTED_ASSESSMENT_YEARS.contains(&self.assessment_year) {
            issues.push(ValidationIssue {
                field: "assessment_year",
                message: format!(
                    "{} is not one of {:?}",
                    self.assessment_year, SUPPORTED_ASSESSMENT_YEARS
                ),
            });
        }

        if self.employment_from > self.employment_to {
            issues.push(ValidationIssue {
                field: "employment_from",
                message: format!(
                    "employment start {} is after end {}",
                    self.employment_from, self.employment_to
                ),
            });
        }

        for (field, amount) in self.amounts() {
            if amount < 0.0 || !amount.is_finite() {
                issues.push(ValidationIssue {
                    field,
                    message: "must be a non-negative amount".to_string(),
                });
            }
        }

        issues
    }

    fn amounts(&self) -> [(&'static str, Money); 6] {
        [
            ("gross_salary", self.gross_salary),
            ("exemptions", self.exemptions),
            ("section16_deductions", self.section16_deductions),
            ("other_income", self.other_income),
            ("chapter6_deductions", self.chapter6_deductions),
            ("tds", self.tds),
        ]
    }
}

/// Fields recovered from model output. `None` means absent or unusable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedFields {
    pub pan: Option<String>,
    pub assessment_year: Option<i32>,
    pub employment_from: Option<NaiveDate>,
    pub employment_to: Option<NaiveDate>,
    pub gross_salary: Option<Money>,
    pub exemptions: Option<Money>,
    pub section16_deductions: Option<Money>,
    pub other_income: Option<Money>,
    pub chapter6_deductions: Option<Money>,
    pub tds: Option<Money>,
}

impl ExtractedFields {
    /// Convert a recovered JSON object field by field. A bad value drops only
    /// that field.
    pub fn from_json_map(map: &Map<String, Value>) -> Self {
        for key in map.keys() {
            if !FIELD_KEYS.contains(&key.as_str()) {
                debug!("Ignoring unknown extracted key: {}", key);
            }
        }

        let money = |key: &str| map.get(key).and_then(parse_amount);
        let date = |key: &str| map.get(key).and_then(parse_date);

        Self {
            pan: map.get("pan").and_then(parse_pan),
            assessment_year: map.get("assessment_year").and_then(parse_assessment_year),
            employment_from: date("employment_from"),
            employment_to: date("employment_to"),
            gross_salary: money("gross_salary"),
            exemptions: money("exemptions"),
            section16_deductions: money("section16_deductions"),
            other_income: money("other_income"),
            chapter6_deductions: money("chapter6_deductions"),
            tds: money("tds"),
        }
    }

    /// Keys that carry a value, in prompt order.
    pub fn populated_keys(&self) -> Vec<&'static str> {
        let present = [
            self.pan.is_some(),
            self.assessment_year.is_some(),
            self.employment_from.is_some(),
            self.employment_to.is_some(),
            self.gross_salary.is_some(),
            self.exemptions.is_some(),
            self.section16_deductions.is_some(),
            self.other_income.is_some(),
            self.chapter6_deductions.is_some(),
            self.tds.is_some(),
        ];
        FIELD_KEYS
            .iter()
            .zip(present)
            .filter_map(|(key, present)| present.then_some(*key))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.populated_keys().is_empty()
    }
}

// ============================================================================
// Lenient value parsers
// ============================================================================

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_pan(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(_) => non_empty_str(value)?.to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(raw.chars().take(PAN_MAX_CHARS).collect())
}

fn parse_assessment_year(value: &Value) -> Option<i32> {
    let year = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))?,
        Value::String(_) => {
            static YEAR: OnceLock<Regex> = OnceLock::new();
            let re = YEAR.get_or_init(|| Regex::new(r"\b(\d{4})\b").expect("valid year regex"));
            re.captures(non_empty_str(value)?)?.get(1)?.as_str().parse().ok()?
        }
        _ => return None,
    };
    let year = i32::try_from(year).ok()?;
    SUPPORTED_ASSESSMENT_YEARS.contains(&year).then_some(year)
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = non_empty_str(value)?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            // ISO datetime such as 2023-04-01T00:00:00
            raw.get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

fn parse_amount(value: &Value) -> Option<Money> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(_) => {
            static AMOUNT: OnceLock<Regex> = OnceLock::new();
            let re = AMOUNT.get_or_init(|| {
                Regex::new(r"(?i)^(?:₹|rs\.?|inr)?\s*(-)?\s*(?:₹|rs\.?|inr)?\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*(?:/-)?\s*(?:₹|rs\.?|inr)?$")
                    .expect("valid amount regex")
            });
            let caps = re.captures(non_empty_str(value)?)?;
            let digits = caps.get(2)?.as_str().replace(',', "");
            let amount: Money = digits.parse().ok()?;
            if caps.get(1).is_some() {
                -amount
            } else {
                amount
            }
        }
        _ => return None,
    };
    (amount.is_finite() && amount >= 0.0).then_some(amount)
}

// ============================================================================
// Display
// ============================================================================

/// Render an amount with Indian digit grouping, e.g. `₹ 12,34,567.00`.
pub fn format_inr(amount: Money) -> String {
    let formatted = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let grouped = if int_part.len() <= 3 {
        int_part.to_string()
    } else {
        let (head, tail) = int_part.split_at(int_part.len() - 3);
        let mut groups: Vec<&str> = Vec::new();
        let mut end = head.len();
        while end > 0 {
            let start = end.saturating_sub(2);
            groups.push(&head[start..end]);
            end = start;
        }
        groups.reverse();
        format!("{},{}", groups.join(","), tail)
    };

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("₹ {}{}.{}", sign, grouped, frac_part)
}
