//! Free-text tax-saving suggestions. Advisory only; never affects the numbers.

use crate::completion::{CompletionClient, CompletionRequest};
use crate::error::{Diagnostic, PipelineError};
use crate::fields::{format_inr, StructuredTaxFields};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tracing::{info, warn};

const ADVICE_TEMPERATURE: f32 = 0.7;
const ADVICE_MAX_TOKENS: u32 = 1024;

pub const FALLBACK_ADVICE: &str = "Unable to generate AI recommendations at this time.";

/// Serialized as `{ "advice": <text>, "fallback": <bool>, "diagnostic"?: {..} }`.
#[derive(Debug, Clone, PartialEq)]
pub enum Advice {
    Generated { text: String },
    Fallback { text: String, diagnostic: Diagnostic },
}

impl Advice {
    pub fn text(&self) -> &str {
        match self {
            Self::Generated { text } | Self::Fallback { text, .. } => text.as_str(),
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Generated { .. } => None,
            Self::Fallback { diagnostic, .. } => Some(diagnostic),
        }
    }
}

#[derive(Serialize)]
struct AdviceBody<'a> {
    advice: &'a str,
    fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostic: Option<&'a Diagnostic>,
}

impl Serialize for Advice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AdviceBody {
            advice: self.text(),
            fallback: self.diagnostic().is_some(),
            diagnostic: self.diagnostic(),
        }
        .serialize(serializer)
    }
}

pub struct AdvisorGenerator {
    client: Arc<dyn CompletionClient>,
    model: String,
}

impl AdvisorGenerator {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Ask for strategies; any service failure yields [`FALLBACK_ADVICE`].
    pub async fn advise(&self, fields: &StructuredTaxFields) -> Advice {
        let request = CompletionRequest {
            model: self.model.clone(),
            prompt: build_prompt(fields),
            temperature: ADVICE_TEMPERATURE,
            max_tokens: ADVICE_MAX_TOKENS,
        };

        match self.client.complete(&request).await {
            Ok(text) => {
                info!("Generated advice ({} chars)", text.len());
                Advice::Generated { text }
            }
            Err(e) => {
                let err = PipelineError::external(&e);
                warn!("Advice generation failed: {}", err);
                Advice::Fallback {
                    text: FALLBACK_ADVICE.to_string(),
                    diagnostic: Diagnostic::from(&err),
                }
            }
        }
    }
}

pub fn build_prompt(fields: &StructuredTaxFields) -> String {
    format!(
        r#"Suggest 5 strategies to reduce tax liability for an Indian taxpayer with:
- Gross Income: {}
- Chapter VI-A Deductions: {}
- TDS Deducted: {}

Number each strategy. Provide section numbers and calculation examples according to Indian tax laws."#,
        format_inr(fields.gross_salary),
        format_inr(fields.chapter6_deductions),
        format_inr(fields.tds)
    )
}
