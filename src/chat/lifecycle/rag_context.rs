//! Assembly of retrieved documents into generation context.

use crate::chat::gateway::RetrievedDoc;

/// Preamble placed before the concatenated documents.
const CONTEXT_PREAMBLE: &str = "Use the following documents to help answer the user's question:";

/// Build the system context for a RAG-augmented turn.
///
/// Documents are concatenated in the order the retrieval service returned
/// them (its relevance ranking is opaque here), separated by blank lines,
/// and truncated to `max_chars` characters on a character boundary before
/// the preamble is attached.
#[must_use]
pub fn build_rag_context(docs: &[RetrievedDoc], max_chars: usize) -> String {
    let joined = docs
        .iter()
        .map(|doc| doc.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let truncated: String = joined.chars().take(max_chars).collect();
    format!("{CONTEXT_PREAMBLE}\n\n{truncated}")
}
