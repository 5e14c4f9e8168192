//! End-to-end statement pipeline.
//!
//! normalize → recognize → extract → merge produces the working record; the
//! calculator and advisor each read that record independently.

use crate::advisor::{Advice, AdvisorGenerator};
use crate::error::{Diagnostic, PipelineError};
use crate::extractor::FieldExtractor;
use crate::fields::StructuredTaxFields;
use crate::merge::merge;
use crate::ocr::{self, TextRecognizer};
use crate::preprocess;
use crate::tax::{self, TaxComputation};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Fields recovered from one uploaded statement.
#[derive(Debug, Clone, Serialize)]
pub struct FieldsReport {
    pub run_id: String,
    pub image_sha256: String,
    pub fields: StructuredTaxFields,
    /// Keys whose value came from the document rather than the defaults.
    pub extracted_keys: Vec<&'static str>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Fields, computation and advice for one uploaded statement.
#[derive(Debug, Clone, Serialize)]
pub struct FullReport {
    #[serde(flatten)]
    pub fields: FieldsReport,
    pub computation: TaxComputation,
    pub advice: Advice,
}

/// Holds only immutable collaborators; safe to share across requests.
pub struct Pipeline {
    recognizer: Arc<dyn TextRecognizer>,
    extractor: FieldExtractor,
    advisor: AdvisorGenerator,
}

impl Pipeline {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        extractor: FieldExtractor,
        advisor: AdvisorGenerator,
    ) -> Self {
        Self {
            recognizer,
            extractor,
            advisor,
        }
    }

    /// Turn an uploaded image into a merged record.
    ///
    /// Only unreadable images and empty recognition abort; extraction problems
    /// come back as diagnostics next to the default values.
    pub async fn analyze_image(&self, data: &[u8]) -> Result<FieldsReport, PipelineError> {
        let run_id = format!("run_{}", Uuid::new_v4().simple());
        let image_sha256 = {
            let mut hasher = Sha256::new();
            hasher.update(data);
            format!("{:x}", hasher.finalize())
        };
        info!("{}: analyzing {} byte upload (sha256={})", run_id, data.len(), image_sha256);

        let binary = preprocess::normalize(data)?;
        let text = ocr::capture_text(self.recognizer.as_ref(), &binary).await?;

        let outcome = self.extractor.extract(&text).await;
        let extracted = outcome.fields();
        let fields = merge(StructuredTaxFields::default(), &extracted);

        info!(
            "{}: merged record ({} of {} fields from document)",
            run_id,
            extracted.populated_keys().len(),
            crate::fields::FIELD_KEYS.len()
        );

        Ok(FieldsReport {
            run_id,
            image_sha256,
            fields,
            extracted_keys: extracted.populated_keys(),
            diagnostics: outcome.diagnostic().cloned().into_iter().collect(),
        })
    }

    pub fn compute(&self, fields: &StructuredTaxFields) -> TaxComputation {
        tax::calculate(fields)
    }

    pub async fn advise(&self, fields: &StructuredTaxFields) -> Advice {
        self.advisor.advise(fields).await
    }

    /// Analyze, compute and advise in one go.
    pub async fn process(&self, data: &[u8]) -> Result<FullReport, PipelineError> {
        let fields = self.analyze_image(data).await?;
        let computation = self.compute(&fields.fields);
        let advice = self.advise(&fields.fields).await;
        Ok(FullReport {
            fields,
            computation,
            advice,
        })
    }
}
