//! Contextualized embedding text generation.
//!
//! The stored chunk text stays raw; only the text sent to the embedder gets
//! the file path, unit, language, declaration signature, docstring summary
//! and a few import lines prepended.

use crate::chunker::Chunk;

/// Maximum number of import lines included in the embedding text.
const MAX_IMPORT_LINES: usize = 5;

/// Generate text optimized for embedding (not for display).
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk, imports: &str) -> String {
    let mut text = String::with_capacity(chunk.text.len() + 256);

    text.push_str("# ");
    text.push_str(&chunk.file_path);
    text.push('\n');

    text.push_str("# ");
    text.push_str(chunk.unit_type.as_str());
    text.push_str(": ");
    text.push_str(&chunk.parent_name);
    text.push('\n');

    text.push_str("# Language: ");
    text.push_str(chunk.language.id());
    text.push('\n');

    if let Some(signature) = &chunk.details.signature {
        text.push_str("# Signature: ");
        text.push_str(signature);
        text.push('\n');
    }
    if let Some(summary) = chunk.details.summary() {
        text.push_str("# Doc: ");
        text.push_str(&summary);
        text.push('\n');
    }

    if !imports.is_empty() {
        let trimmed: String = imports
            .lines()
            .take(MAX_IMPORT_LINES)
            .collect::<Vec<_>>()
            .join("\n");
        text.push_str(&trimmed);
        text.push('\n');
    }

    text.push_str(&chunk.text);
    text
}

/// Short header for display in retrieved results.
#[must_use]
pub fn chunk_display_header(chunk: &Chunk) -> String {
    format!(
        "{} :: {} (lines {}-{})",
        chunk.file_path, chunk.name, chunk.start_line, chunk.end_line
    )
}
