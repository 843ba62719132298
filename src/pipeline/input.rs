//! Input resolution: load a user-supplied path or URL into memory.
//!
//! The whole document is handed to the oracle in one request, so there is no
//! reason to keep it on disk: local files are read fully and URLs are
//! downloaded straight into a buffer. PDFs are checked for the `%PDF` magic
//! bytes here so a wrong file fails before any API call is made.

use crate::error::InvoiceError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Payload handed to an extraction oracle.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentPayload {
    /// Raw bytes of a PDF file.
    Pdf(Vec<u8>),
    /// Text already extracted from the invoice by some other tool.
    Text(String),
}

impl DocumentPayload {
    /// Short label used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentPayload::Pdf(_) => "PDF",
            DocumentPayload::Text(_) => "text",
        }
    }
}

/// A document loaded into memory, with the input string it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub source: String,
    pub payload: DocumentPayload,
}

impl Document {
    pub fn pdf(source: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            source: source.into(),
            payload: DocumentPayload::Pdf(bytes),
        }
    }

    pub fn text(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            payload: DocumentPayload::Text(text.into()),
        }
    }
}

/// How the input should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputKind {
    /// A PDF file; magic bytes are verified. (default)
    #[default]
    Pdf,
    /// A UTF-8 text file holding pre-extracted invoice text.
    Text,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load the input string into a [`Document`].
///
/// If the input is a URL, download it; otherwise read the local file.
pub async fn load_document(
    input: &str,
    kind: InputKind,
    timeout_secs: u64,
) -> Result<Document, InvoiceError> {
    if input.trim().is_empty() {
        return Err(InvoiceError::InvalidInput {
            input: input.to_string(),
        });
    }

    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };

    let path = PathBuf::from(input);
    let document = match kind {
        InputKind::Pdf => {
            check_pdf_magic(&path, &bytes)?;
            Document::pdf(input, bytes)
        }
        InputKind::Text => {
            let text = String::from_utf8(bytes).map_err(|_| InvoiceError::NotUtf8Text { path })?;
            Document::text(input, text)
        }
    };

    debug!(
        "Loaded {} document from {}",
        document.payload.kind(),
        document.source
    );
    Ok(document)
}

/// Read a local file fully, mapping I/O errors to configuration errors.
async fn read_local(path_str: &str) -> Result<Vec<u8>, InvoiceError> {
    let path = PathBuf::from(path_str);

    if !path.is_file() {
        return Err(InvoiceError::FileNotFound { path });
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(InvoiceError::PermissionDenied { path })
        }
        Err(_) => Err(InvoiceError::FileNotFound { path }),
    }
}

fn check_pdf_magic(path: &Path, bytes: &[u8]) -> Result<(), InvoiceError> {
    if bytes.len() >= 4 && &bytes[..4] == b"%PDF" {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(InvoiceError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, InvoiceError> {
    info!("Downloading invoice from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| InvoiceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            InvoiceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            InvoiceError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_send_err)?;

    if !response.status().is_success() {
        return Err(InvoiceError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_send_err)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
