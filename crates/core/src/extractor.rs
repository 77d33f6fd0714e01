use crate::error::IngestError;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

/// Form feed, the page separator in `pdftotext`-style exports.
pub const PAGE_BREAK: char = '\u{000c}';

const SECTION_SCAN_CHARS: usize = 500;
const SECTION_SCAN_LINES: usize = 5;
const MAX_HEADER_CHARS: usize = 120;

static DIVISION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(DIVISION\s+0?1\b|\b01\s\d{2}\s\d{2})").expect("division pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
    pub section: Option<String>,
}

pub trait PageExtractor {
    /// Lowercase file extensions this extractor accepts.
    fn extensions(&self) -> &[&str];

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

/// Reads UTF-8 text files, one page per form-feed separated block.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub const EXTENSIONS: &'static [&'static str] = &["txt", "md"];
}

impl PageExtractor for PlainTextExtractor {
    fn extensions(&self) -> &[&str] {
        Self::EXTENSIONS
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let raw = fs::read_to_string(path)?;
        let pages = split_pages(&raw);
        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(IngestError::InvalidArgument(format!(
                "file had no readable text: {}",
                path.display()
            )));
        }
        Ok(pages)
    }
}

/// Splits on form feeds; blank pages keep their number so page numbering
/// matches the source.
pub fn split_pages(raw: &str) -> Vec<PageText> {
    let raw = raw.strip_suffix(PAGE_BREAK).unwrap_or(raw);
    raw.split(PAGE_BREAK)
        .zip(1u32..)
        .map(|(text, number)| PageText {
            number,
            section: detect_section_header(text),
            text: text.to_string(),
        })
        .collect()
}

/// First CSI division marker near the top of the page, else the first short
/// all-caps line among the opening lines.
pub fn detect_section_header(text: &str) -> Option<String> {
    let head: String = text.chars().take(SECTION_SCAN_CHARS).collect();
    if let Some(found) = DIVISION_HEADER.find(&head) {
        return Some(found.as_str().to_string());
    }

    head.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(SECTION_SCAN_LINES)
        .find(|line| is_upper_case_line(line) && line.chars().count() < MAX_HEADER_CHARS)
        .map(str::to_string)
}

fn is_upper_case_line(line: &str) -> bool {
    let mut cased = line.chars().filter(|c| c.is_lowercase() || c.is_uppercase()).peekable();
    cased.peek().is_some() && cased.all(char::is_uppercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn form_feeds_separate_pages() {
        let pages = split_pages("First page\x0c\x0cThird page\x0c");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[1].text, "");
        assert_eq!(pages[2].number, 3);
        assert_eq!(pages[2].text, "Third page");
    }

    #[test]
    fn division_marker_wins_over_caps_line() {
        assert_eq!(
            detect_section_header("GENERAL REQUIREMENTS\nDivision 01 summary of work"),
            Some("Division 01".to_string())
        );
        assert_eq!(
            detect_section_header("Section 01 33 00 submittal procedures"),
            Some("01 33 00".to_string())
        );
    }

    #[test]
    fn caps_line_is_fallback_header() {
        assert_eq!(
            detect_section_header("\n  BID FORM  \nBidder shall complete all blanks."),
            Some("BID FORM".to_string())
        );
        assert_eq!(detect_section_header("Plain prose only.\n12 34"), None);
        assert_eq!(detect_section_header(""), None);
    }

    #[test]
    fn blank_file_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("blank.txt");
        fs::write(&path, "  \x0c\n")?;
        assert!(matches!(
            PlainTextExtractor.extract_pages(&path),
            Err(IngestError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn invalid_utf8_is_an_io_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("binary.txt");
        fs::write(&path, [0xff, 0xfe, 0x00])?;
        assert!(matches!(
            PlainTextExtractor.extract_pages(&path),
            Err(IngestError::Io(_))
        ));
        Ok(())
    }
}
