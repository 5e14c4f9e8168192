//! Text capture over a pluggable recognition engine.
//!
//! Defines the [`TextRecognizer`] trait so the recognizer (an EasyOCR sidecar in
//! production, a canned fake in tests) can be swapped without touching the
//! pipeline.

pub mod sidecar;

use crate::error::PipelineError;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Corner points of a recognized region, as reported by the engine.
pub type BoundingRegion = Vec<[f64; 2]>;

/// One recognized span: `(region, text, confidence)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan(pub BoundingRegion, pub String, pub f64);

impl TextSpan {
    pub fn region(&self) -> &BoundingRegion {
        &self.0
    }

    pub fn text(&self) -> &str {
        &self.1
    }

    pub fn confidence(&self) -> f64 {
        self.2
    }
}

/// Async trait implemented by each recognition backend.
#[async_trait::async_trait]
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize text spans on a binarized image. Failures are `InputError`.
    async fn recognize(&self, image: &GrayImage) -> Result<Vec<TextSpan>, PipelineError>;
}

/// Run recognition and join span texts with single spaces.
///
/// The blob keeps recognizer-defined order; it is not guaranteed to follow
/// the visual layout of the page.
pub async fn capture_text(
    recognizer: &dyn TextRecognizer,
    image: &GrayImage,
) -> Result<String, PipelineError> {
    let spans = recognizer.recognize(image).await?;
    for span in &spans {
        debug!(
            "{}: {:?} at {:?} (confidence {:.2})",
            recognizer.name(),
            span.text(),
            span.region(),
            span.confidence()
        );
    }
    let blob = join_spans(&spans);

    if blob.trim().is_empty() {
        warn!("{}: no readable text in {} spans", recognizer.name(), spans.len());
        return Err(PipelineError::EmptyExtraction);
    }

    let mean_confidence =
        spans.iter().map(TextSpan::confidence).sum::<f64>() / spans.len() as f64;
    info!(
        "{}: recognized {} spans ({} chars, mean confidence {:.2})",
        recognizer.name(),
        spans.len(),
        blob.chars().count(),
        mean_confidence
    );
    Ok(blob)
}

fn join_spans(spans: &[TextSpan]) -> String {
    spans.iter().map(TextSpan::text).collect::<Vec<_>>().join(" ")
}
