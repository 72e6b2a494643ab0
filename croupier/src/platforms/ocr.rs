use super::{RecognitionMode, TextRecognizer};
use crate::errors::EngineError;
use image::DynamicImage;
use tracing::debug;
use uni_ocr::{OcrEngine, OcrProvider};

/// Text recognition through the platform OCR provider.
///
/// The provider segments pages on its own; the recognition mode is only
/// logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniOcr;

#[async_trait::async_trait]
impl TextRecognizer for UniOcr {
    async fn extract_text(
        &self,
        image: &DynamicImage,
        mode: RecognitionMode,
    ) -> Result<String, EngineError> {
        let engine = OcrEngine::new(OcrProvider::Auto)
            .map_err(|e| EngineError::Platform(format!("Failed to create OCR engine: {e}")))?;

        let (text, _language, confidence) = engine
            .recognize_image(image)
            .await
            .map_err(|e| EngineError::Platform(format!("OCR recognition failed: {e}")))?;

        debug!("OCR ({:?}) confidence {:?}", mode, confidence);
        Ok(text)
    }
}
