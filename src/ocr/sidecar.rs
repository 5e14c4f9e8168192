//! EasyOCR sidecar recognizer.

use super::{TextRecognizer, TextSpan};
use crate::error::PipelineError;
use crate::preprocess;
use image::GrayImage;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, info};

pub struct OcrSidecar {
    url: String,
    client: reqwest::Client,
}

impl OcrSidecar {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    async fn read_text(&self, png: Vec<u8>) -> anyhow::Result<Vec<TextSpan>> {
        let part = Part::bytes(png)
            .file_name("statement.png")
            .mime_str("image/png")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/readtext", self.url.trim_end_matches('/')))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                anyhow::bail!("recognizer rejected image ({}): {}", status, body);
            }
            anyhow::bail!("OCR sidecar error ({}): {}", status, body);
        }

        let raw = response.text().await?;
        debug!(
            "OcrSidecar: raw response ({} bytes): {}",
            raw.len(),
            raw.chars().take(500).collect::<String>()
        );
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait::async_trait]
impl TextRecognizer for OcrSidecar {
    fn name(&self) -> &str {
        "easyocr_sidecar"
    }

    async fn recognize(&self, image: &GrayImage) -> Result<Vec<TextSpan>, PipelineError> {
        let png = preprocess::encode_png(image)
            .map_err(|e| PipelineError::Input(format!("failed to encode image: {}", e)))?;

        info!("OcrSidecar: sending {} byte image to {}", png.len(), self.url);

        self.read_text(png)
            .await
            .map_err(|e| PipelineError::Input(format!("text recognition failed: {:#}", e)))
    }
}
