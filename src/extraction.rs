//! Which text extractor a vault file would go through.
//!
//! Lookup only; export and import treat every file as opaque bytes.

use std::fmt;
use std::path::Path;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    ImageOcr,
    Pdf,
    PlainText,
    Word,
    Epub,
    Unsupported,
}

impl ExtractionStrategy {
    /// Strategy for a bare extension, case-insensitive, with or without the dot
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" => Self::ImageOcr,
            "pdf" => Self::Pdf,
            "txt" => Self::PlainText,
            "doc" | "docx" => Self::Word,
            "epub" => Self::Epub,
            _ => Self::Unsupported,
        }
    }

    pub fn is_supported(&self) -> bool {
        *self != Self::Unsupported
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageOcr => "image-ocr",
            Self::Pdf => "pdf",
            Self::PlainText => "plain-text",
            Self::Word => "word",
            Self::Epub => "epub",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy for a file path; no extension means unsupported
pub fn strategy_for<P: AsRef<Path>>(path: P) -> ExtractionStrategy {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(ExtractionStrategy::from_extension)
        .unwrap_or(ExtractionStrategy::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert_eq!(strategy_for("scan.JPG"), ExtractionStrategy::ImageOcr);
        assert_eq!(strategy_for("notes/a.txt"), ExtractionStrategy::PlainText);
        assert_eq!(strategy_for("report.docx"), ExtractionStrategy::Word);
        assert_eq!(strategy_for("book.epub"), ExtractionStrategy::Epub);
        assert_eq!(ExtractionStrategy::from_extension(".Pdf"), ExtractionStrategy::Pdf);
    }

    #[test]
    fn test_unknown_defaults_to_unsupported() {
        assert_eq!(strategy_for("archive.tar.gz"), ExtractionStrategy::Unsupported);
        assert_eq!(strategy_for("README"), ExtractionStrategy::Unsupported);
        assert!(!strategy_for("x.exe").is_supported());
    }
}
