//! Document encoding: raw PDF bytes → base64 attachment.
//!
//! Multimodal APIs accept binary attachments as base64 strings embedded in
//! the JSON request body. The PDF is sent as-is (no rasterisation): models
//! that read PDFs natively see the embedded text layer as well as the layout.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// MIME type sent with the document attachment.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Encode a PDF as a base64 attachment ready for the multimodal request.
pub fn encode_pdf(bytes: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded PDF {} bytes → {} bytes base64", bytes.len(), b64.len());
    ImageData::new(b64, PDF_MIME_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_small_pdf() {
        let bytes = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n%%EOF";
        let data = encode_pdf(bytes);
        assert_eq!(data.mime_type, PDF_MIME_TYPE);
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, bytes);
    }
}
