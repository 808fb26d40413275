//! PDF page-text extraction.

use lopdf::Document;

use crate::error::AppError;

/// Text of a single PDF page, 1-based page number preserved.
#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Extract per-page text from raw PDF bytes. Pages without readable text are
/// skipped; a document with none at all is rejected as invalid input.
///
/// The parse is CPU-bound, so it runs on the blocking pool.
pub async fn extract_pages(bytes: Vec<u8>) -> Result<Vec<PageText>, AppError> {
    let pages = tokio::task::spawn_blocking(move || extract_pages_blocking(&bytes))
        .await
        .map_err(|e| AppError::Internal(format!("pdf task failed: {e}")))??;
    Ok(pages)
}

fn extract_pages_blocking(bytes: &[u8]) -> Result<Vec<PageText>, AppError> {
    let document = Document::load_mem(bytes)
        .map_err(|e| AppError::InvalidInput(format!("failed to parse PDF: {e}")))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = match document.extract_text(&[page_no]) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(page = page_no, error = %error, "page text extraction failed");
                continue;
            }
        };

        if !text.trim().is_empty() {
            pages.push(PageText {
                number: page_no,
                text,
            });
        }
    }

    if pages.is_empty() {
        return Err(AppError::InvalidInput(
            "PDF has no readable page text".to_string(),
        ));
    }

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn garbage_bytes_are_invalid_input() {
        let err = extract_pages(b"not a pdf at all".to_vec()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_bytes_are_invalid_input() {
        let err = extract_pages(Vec::new()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
