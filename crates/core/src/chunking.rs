use crate::models::Chunk;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    pub chars_per_token: usize,
    /// A window end snaps back to a newline found within this many trailing characters.
    pub newline_snap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 300,
            overlap_tokens: 50,
            chars_per_token: 4,
            newline_snap_chars: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn window_chars(&self) -> usize {
        self.target_tokens.saturating_mul(self.chars_per_token).max(1)
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_tokens.saturating_mul(self.chars_per_token)
    }
}

/// Half-open character range `[start, end)` of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

pub fn chunk_spans(text: &str, config: ChunkingConfig) -> Vec<ChunkSpan> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total == 0 {
        return Vec::new();
    }

    let window = config.window_chars();
    let overlap = config.overlap_chars();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < total {
        let mut end = (start + window).min(total);

        // The final window always runs to the end of the text.
        if end < total {
            let floor = end
                .saturating_sub(config.newline_snap_chars)
                .max(start + 1);
            if let Some(newline) = (floor..end).rev().find(|&index| chars[index] == '\n') {
                end = newline;
            }
        }

        spans.push(ChunkSpan { start, end });
        if end >= total {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    spans
}

pub fn build_chunks(
    document_id: &str,
    filename: &str,
    page_number: u32,
    section: Option<&str>,
    page_text: &str,
    config: ChunkingConfig,
) -> Vec<Chunk> {
    let section = section
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let offsets = char_byte_offsets(page_text);

    chunk_spans(page_text, config)
        .into_iter()
        .map(|span| {
            let text = &page_text[offsets[span.start]..offsets[span.end]];
            let content_hash = sha256_hex(text.as_bytes());
            Chunk {
                id: make_chunk_id(document_id, page_number, span, &content_hash),
                document_id: document_id.to_string(),
                filename: filename.to_string(),
                page_number,
                section: section.clone(),
                text: text.to_string(),
                char_start: span.start,
                char_end: span.end,
                content_hash,
            }
        })
        .collect()
}

fn make_chunk_id(document_id: &str, page: u32, span: ChunkSpan, content_hash: &str) -> String {
    let key = format!(
        "{document_id}:{page}:{}:{}:{content_hash}",
        span.start, span.end
    );
    sha256_hex(key.as_bytes())
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Byte offset of every character boundary, including the end of the string.
pub(crate) fn char_byte_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(index, _)| index)
        .chain(std::iter::once(text.len()))
        .collect()
}

/// Slices `text` by character offsets, clamping both ends to the text.
pub(crate) fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let offsets = char_byte_offsets(text);
    let last = offsets.len() - 1;
    let end = end.min(last);
    let start = start.min(end);
    &text[offsets[start]..offsets[end]]
}
