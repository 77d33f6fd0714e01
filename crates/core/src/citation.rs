use crate::models::{Chunk, Citation};
use crate::traits::ChunkStore;
use crate::SearchError;

/// Character offsets `[start, end)` of the first occurrence of `quote` in `text`.
pub fn locate_quote(text: &str, quote: &str) -> Option<(usize, usize)> {
    if quote.is_empty() {
        return None;
    }
    let byte_offset = text.find(quote)?;
    let start = text[..byte_offset].chars().count();
    Some((start, start + quote.chars().count()))
}

impl Citation {
    /// Builds a citation for `quote` if it occurs verbatim in the chunk.
    pub fn from_quote(chunk: &Chunk, quote: &str) -> Option<Self> {
        let (char_start, char_end) = locate_quote(&chunk.text, quote)?;
        Some(Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            filename: chunk.filename.clone(),
            page_number: chunk.page_number,
            section: chunk.section.clone(),
            quote: quote.to_string(),
            char_start,
            char_end,
        })
    }

    fn has_offsets(&self) -> bool {
        self.char_start != 0 || self.char_end != 0
    }
}

/// True iff the quote is a literal substring of `chunk.text` and any supplied
/// offsets bound its first occurrence exactly.
pub fn citation_matches(chunk: &Chunk, citation: &Citation) -> bool {
    let Some((start, end)) = locate_quote(&chunk.text, &citation.quote) else {
        return false;
    };
    !citation.has_offsets() || (citation.char_start == start && citation.char_end == end)
}

/// An empty quote never validates: it would cite nothing.
pub async fn validate_citation<S>(store: &S, citation: &Citation) -> Result<bool, SearchError>
where
    S: ChunkStore + Sync + ?Sized,
{
    let chunk = store
        .chunks_by_ids(std::slice::from_ref(&citation.chunk_id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| SearchError::not_found("chunk", citation.chunk_id.clone()))?;
    Ok(citation_matches(&chunk, citation))
}

/// All-of validation; stops at the first failing citation.
pub async fn validate_citations<S>(store: &S, citations: &[Citation]) -> Result<bool, SearchError>
where
    S: ChunkStore + Sync + ?Sized,
{
    for citation in citations {
        if !validate_citation(store, citation).await? {
            return Ok(false);
        }
    }
    Ok(true)
}
