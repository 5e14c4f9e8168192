//! Structured field extraction from recognized statement text.
//!
//! Builds a bounded prompt, asks the completion service for a single JSON
//! object and recovers that object from whatever text comes back. Every
//! failure here is non-fatal: the outcome degrades to an empty extraction
//! plus a [`Diagnostic`].

use crate::completion::{CompletionClient, CompletionRequest};
use crate::error::{Diagnostic, PipelineError};
use crate::fields::ExtractedFields;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Near-deterministic sampling for repeatable extraction.
const EXTRACTION_TEMPERATURE: f32 = 0.1;
const EXTRACTION_MAX_TOKENS: u32 = 2048;

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Extracted(ExtractedFields),
    Degraded(Diagnostic),
}

impl ExtractionOutcome {
    /// Recovered fields; empty when degraded.
    pub fn fields(&self) -> ExtractedFields {
        match self {
            Self::Extracted(fields) => fields.clone(),
            Self::Degraded(_) => ExtractedFields::default(),
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Extracted(_) => None,
            Self::Degraded(diag) => Some(diag),
        }
    }
}

/// Prompt-driven field extractor.
pub struct FieldExtractor {
    client: Arc<dyn CompletionClient>,
    model: String,
    max_prompt_chars: usize,
}

impl FieldExtractor {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        model: impl Into<String>,
        max_prompt_chars: usize,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            max_prompt_chars,
        }
    }

    /// Extract fields from a text blob. Never fails.
    pub async fn extract(&self, text: &str) -> ExtractionOutcome {
        match self.try_extract(text).await {
            Ok(fields) if fields.is_empty() => {
                warn!("Model returned a JSON object with no recognizable fields");
                ExtractionOutcome::Extracted(fields)
            }
            Ok(fields) => {
                info!("Extracted fields: {:?}", fields.populated_keys());
                ExtractionOutcome::Extracted(fields)
            }
            Err(err) => {
                warn!("Field extraction degraded to defaults: {}", err);
                ExtractionOutcome::Degraded(Diagnostic::from(&err))
            }
        }
    }

    async fn try_extract(&self, text: &str) -> Result<ExtractedFields, PipelineError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            prompt: build_prompt(text, self.max_prompt_chars),
            temperature: EXTRACTION_TEMPERATURE,
            max_tokens: EXTRACTION_MAX_TOKENS,
        };

        let response = self
            .client
            .complete(&request)
            .await
            .map_err(|e| PipelineError::external(&e))?;

        debug!(
            "Raw extraction response ({} chars): {}",
            response.len(),
            response.chars().take(500).collect::<String>()
        );

        let object = recover_json_object(&response).ok_or_else(|| {
            PipelineError::ExtractionParse("no JSON object found in model response".to_string())
        })?;

        Ok(ExtractedFields::from_json_map(&object))
    }
}

/// Build the extraction instruction around the first `max_chars` characters of `text`.
pub fn build_prompt(text: &str, max_chars: usize) -> String {
    format!(
        r#"Extract the following fields in valid JSON:
- pan (string)
- assessment_year (integer)
- employment_from (YYYY-MM-DD)
- employment_to (YYYY-MM-DD)
- gross_salary (number)
- exemptions (number)
- section16_deductions (number)
- other_income (number)
- chapter6_deductions (number)
- tds (number)

Text: {}
Output only the JSON object."#,
        truncate_chars(text, max_chars)
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Find the first well-formed top-level JSON object in `text`.
///
/// Tracks brace depth outside string literals (honouring backslash escapes).
/// A balanced span that fails to parse is skipped and the scan resumes after
/// its opening brace.
pub fn recover_json_object(text: &str) -> Option<Map<String, Value>> {
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(len) = balanced_span_len(&text.as_bytes()[open..]) {
            let candidate = &text[open..open + len];
            match serde_json::from_str::<Value>(candidate) {
                Ok(Value::Object(map)) => return Some(map),
                Ok(_) => {}
                Err(e) => debug!("Skipping unparsable brace span at {}: {}", open, e),
            }
        }
        start = open + 1;
    }
    None
}

/// Length of the span starting at `bytes[0] == b'{'` through its matching `}`.
fn balanced_span_len(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::tests::FakeCompletion;
    use crate::error::DiagnosticKind;

    fn extractor(fake: Arc<FakeCompletion>) -> FieldExtractor {
        FieldExtractor::new(fake, "test-model", 3000)
    }

    #[test]
    fn test_prompt_lists_every_key_and_truncates() {
        let text = "x".repeat(5000);
        let prompt = build_prompt(&text, 3000);
        for key in crate::fields::FIELD_KEYS {
            assert!(prompt.contains(&format!("- {} (", key)), "missing {}", key);
        }
        assert!(prompt.contains(&"x".repeat(3000)));
        assert!(!prompt.contains(&"x".repeat(3001)));
        assert!(prompt.ends_with("Output only the JSON object."));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("₹₹₹₹", 2), "₹₹");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_recover_plain_and_fenced() {
        let map = recover_json_object(r#"{"tds": 5}"#).unwrap();
        assert_eq!(map["tds"], 5);

        let fenced = "Here you go:\n```json\n{\"pan\": \"ABCDE1234F\"}\n```\nLet me know!";
        let map = recover_json_object(fenced).unwrap();
        assert_eq!(map["pan"], "ABCDE1234F");
    }

    #[test]
    fn test_recover_skips_stray_braces_around_object() {
        let text = r#"Note {this is prose}. Result: {"gross_salary": 800000} and {trailing}"#;
        let map = recover_json_object(text).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["gross_salary"], 800000);
    }

    #[test]
    fn test_recover_handles_braces_inside_strings() {
        let text = r#"{"pan": "AB}C{\"D", "tds": 1} {"other": 2}"#;
        let map = recover_json_object(text).unwrap();
        assert_eq!(map["pan"], "AB}C{\"D");
        assert_eq!(map["tds"], 1);
        assert!(!map.contains_key("other"));
    }

    #[test]
    fn test_recover_none_without_object() {
        assert!(recover_json_object("I could not find any fields.").is_none());
        assert!(recover_json_object("{ unterminated").is_none());
        assert!(recover_json_object("[1, 2, 3]").is_none());
    }

    #[tokio::test]
    async fn test_extract_uses_low_temperature_request() {
        let fake = Arc::new(FakeCompletion::replying(r#"{"tds": "40,000"}"#));
        let outcome = extractor(fake.clone()).extract("TDS 40,000").await;

        let req = fake.last_request();
        assert_eq!(req.model, "test-model");
        assert_eq!(req.temperature, EXTRACTION_TEMPERATURE);
        assert_eq!(req.max_tokens, EXTRACTION_MAX_TOKENS);
        assert!(req.prompt.contains("Text: TDS 40,000"));

        assert_eq!(outcome.fields().tds, Some(40000.0));
        assert!(outcome.diagnostic().is_none());
    }

    #[tokio::test]
    async fn test_extract_object_without_known_keys() {
        let fake = Arc::new(FakeCompletion::replying(r#"{"employer": "Acme Ltd"}"#));
        let outcome = extractor(fake).extract("Acme Ltd").await;

        assert!(matches!(outcome, ExtractionOutcome::Extracted(_)));
        assert!(outcome.fields().is_empty());
        assert!(outcome.diagnostic().is_none());
    }

    #[tokio::test]
    async fn test_extract_without_braces_degrades() {
        let fake = Arc::new(FakeCompletion::replying("Sorry, the text is unreadable."));
        let outcome = extractor(fake).extract("garbled").await;

        assert!(outcome.fields().is_empty());
        let diag = outcome.diagnostic().unwrap();
        assert_eq!(diag.kind, DiagnosticKind::ExtractionParseError);
    }

    #[tokio::test]
    async fn test_extract_service_failure_degrades() {
        let fake = Arc::new(FakeCompletion::failing("Together API error (401): invalid key"));
        let outcome = extractor(fake).extract("text").await;

        assert!(outcome.fields().is_empty());
        let diag = outcome.diagnostic().unwrap();
        assert_eq!(diag.kind, DiagnosticKind::ExternalServiceError);
        assert!(diag.message.contains("401"));
    }
}
