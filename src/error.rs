//! Pipeline error taxonomy and user-facing diagnostics.

use serde::Serialize;

/// Failures that can occur while turning an uploaded statement into fields.
///
/// Only [`PipelineError::Input`] and [`PipelineError::EmptyExtraction`] abort a
/// run. The other two are absorbed by the component that hit them and
/// reported as a [`Diagnostic`] next to a degraded result.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unreadable image: {0}")]
    Input(String),

    #[error("no readable text found, try a clearer image")]
    EmptyExtraction,

    #[error("could not recover fields from model output: {0}")]
    ExtractionParse(String),

    #[error("completion service failed: {message}")]
    ExternalService { message: String, timed_out: bool },
}

impl PipelineError {
    /// Build an `ExternalService` error from a transport failure, flagging timeouts.
    pub fn external(err: &anyhow::Error) -> Self {
        let timed_out = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(|e| e.is_timeout());
        let message = if timed_out {
            format!("timed out: {:#}", err)
        } else {
            format!("{:#}", err)
        };
        Self::ExternalService { message, timed_out }
    }

    fn kind(&self) -> DiagnosticKind {
        match self {
            Self::Input(_) => DiagnosticKind::InputError,
            Self::EmptyExtraction => DiagnosticKind::EmptyExtraction,
            Self::ExtractionParse(_) => DiagnosticKind::ExtractionParseError,
            Self::ExternalService { .. } => DiagnosticKind::ExternalServiceError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    InputError,
    EmptyExtraction,
    ExtractionParseError,
    ExternalServiceError,
}

/// Human-readable note attached to a degraded-but-valid result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl From<&PipelineError> for Diagnostic {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            timed_out: matches!(err, PipelineError::ExternalService { timed_out: true, .. }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            PipelineError::Input("bad header".into()).to_string(),
            "unreadable image: bad header"
        );
        assert_eq!(
            PipelineError::EmptyExtraction.to_string(),
            "no readable text found, try a clearer image"
        );
    }

    #[test]
    fn test_external_from_plain_error_is_not_timeout() {
        let err = anyhow::anyhow!("API error (401): unauthorized");
        match PipelineError::external(&err) {
            PipelineError::ExternalService { message, timed_out } => {
                assert!(message.contains("401"));
                assert!(!timed_out);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_diagnostic_carries_kind_and_message() {
        let err = PipelineError::ExternalService {
            message: "HTTP 503".into(),
            timed_out: false,
        };
        let diag = Diagnostic::from(&err);
        assert_eq!(diag.kind, DiagnosticKind::ExternalServiceError);
        assert_eq!(diag.message, "completion service failed: HTTP 503");
        assert!(!diag.timed_out);
    }
}
