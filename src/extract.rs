//! PDF text extraction.
//!
//! Ingestion supplies raw bytes; this module returns plain UTF-8 text plus a
//! page count. Only PDF is in scope for uploads.

/// Extraction error: no panic; the pipeline maps this to a per-file error.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Pdf(String),
    EmptyText,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(name) => {
                write!(f, "unsupported file format: {}", name)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::EmptyText => write!(f, "document contains no extractable text"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracted text with page metadata.
#[derive(Debug)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: i64,
}

/// True when `filename` carries a supported extension (case-insensitive).
pub fn is_supported_filename(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".pdf")
}

/// Extract plain text and the page count from PDF bytes.
pub fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    if text.trim().is_empty() {
        return Err(ExtractError::EmptyText);
    }

    let page_count = count_pages(bytes);

    Ok(ExtractedText { text, page_count })
}

/// Page count via lopdf. Extraction already succeeded at this point, so a
/// parse failure here degrades to 0 rather than failing the ingestion.
fn count_pages(bytes: &[u8]) -> i64 {
    match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc.get_pages().len() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_filename_is_case_insensitive() {
        assert!(is_supported_filename("report.pdf"));
        assert!(is_supported_filename("REPORT.PDF"));
        assert!(!is_supported_filename("report.docx"));
        assert!(!is_supported_filename("pdf"));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}
