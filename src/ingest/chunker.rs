//! Overlapping window chunking of extracted page text.

use text_splitter::{Characters, ChunkConfig, TextSplitter};

use crate::error::AppError;
use crate::language::{detect_language, Language};

/// Target window size in characters.
pub const DEFAULT_WINDOW_CHARS: usize = 1000;

/// Overlap between consecutive windows in characters.
pub const DEFAULT_OVERLAP_CHARS: usize = 100;

/// One window of extracted text with positional metadata and its fixed
/// language tag.
#[derive(Debug, Clone)]
pub struct ChunkWindow {
    pub content: String,
    pub source_file: String,
    pub page: u32,
    /// Byte offset within the original page text.
    pub offset: usize,
    pub language: Language,
}

pub struct Chunker {
    splitter: TextSplitter<Characters>,
}

impl Chunker {
    pub fn new(window_chars: usize, overlap_chars: usize) -> Result<Self, AppError> {
        let config = ChunkConfig::new(window_chars)
            .with_sizer(Characters)
            .with_overlap(overlap_chars)
            .map_err(|e| AppError::Internal(format!("invalid chunking config: {e}")))?
            .with_trim(true);
        Ok(Self {
            splitter: TextSplitter::new(config),
        })
    }

    pub fn with_defaults() -> Result<Self, AppError> {
        Self::new(DEFAULT_WINDOW_CHARS, DEFAULT_OVERLAP_CHARS)
    }

    /// Split one page into ordered windows. The splitter recursively prefers
    /// paragraph, line, then word boundaries; offsets are byte positions in
    /// the page text. An empty page yields no windows.
    pub fn windows(&self, source_file: &str, page: u32, text: &str) -> Vec<ChunkWindow> {
        self.splitter
            .chunk_indices(text)
            .filter(|(_, chunk)| !chunk.trim().is_empty())
            .map(|(offset, chunk)| ChunkWindow {
                content: chunk.to_string(),
                source_file: source_file.to_string(),
                page,
                offset,
                language: detect_language(chunk),
            })
            .collect()
    }
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_windows() {
        let chunker = Chunker::with_defaults().unwrap();
        assert!(chunker.windows("doc.pdf", 1, "").is_empty());
        assert!(chunker.windows("doc.pdf", 1, "   \n\n  ").is_empty());
    }

    #[test]
    fn short_input_is_a_single_window() {
        let chunker = Chunker::with_defaults().unwrap();
        let windows = chunker.windows("doc.pdf", 3, "A short clause.");
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].page, 3);
        assert_eq!(windows[0].offset, 0);
        assert_eq!(windows[0].language, Language::En);
    }

    #[test]
    fn long_input_is_windowed_in_order() {
        let chunker = Chunker::new(50, 10).unwrap();
        let paragraph = "The lessee shall pay the rent monthly. ".repeat(10);
        let windows = chunker.windows("doc.pdf", 1, &paragraph);

        assert!(windows.len() > 1);
        for w in &windows {
            assert!(w.content.chars().count() <= 50);
        }
        // Offsets strictly increase, preserving document order.
        for pair in windows.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
        }
    }

    #[test]
    fn windows_carry_their_own_language() {
        let chunker = Chunker::new(60, 0).unwrap();
        let text = "The tenant pays monthly rent on the first day.\n\n\
                    يلتزم المستأجر بدفع الإيجار في اليوم الأول من كل شهر";
        let windows = chunker.windows("lease.pdf", 1, text);
        assert!(windows.iter().any(|w| w.language == Language::En));
        assert!(windows.iter().any(|w| w.language == Language::Ar));
    }
}
