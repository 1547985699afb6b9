//! Bounded context assembly with citations.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::chunker::Chunk;
use crate::languages::Lang;
use crate::parser::UnitType;
use crate::retriever::RankedResult;

const CHARS_PER_TOKEN: usize = 4;

/// Size limit for assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextBudget {
    Chars(usize),
    /// Converted at four characters per token.
    Tokens(usize),
}

impl ContextBudget {
    #[must_use]
    pub fn as_chars(self) -> usize {
        match self {
            Self::Chars(n) => n,
            Self::Tokens(n) => n.saturating_mul(CHARS_PER_TOKEN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub unit_type: UnitType,
    pub name: String,
    pub language: Lang,
}

impl Citation {
    fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            file_path: chunk.file_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            unit_type: chunk.unit_type,
            name: chunk.name.clone(),
            language: chunk.language,
        }
    }
}

impl std::fmt::Display for Citation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}-{} {} {}",
            self.file_path, self.start_line, self.end_line, self.unit_type, self.name
        )
    }
}

/// One chunk of assembled context.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub citation: Citation,
    pub score: f32,
    /// Rank the chunk had in the retrieved results.
    pub rank: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    /// Ordered by file path, then start line.
    pub blocks: Vec<TextBlock>,
    pub citations: Vec<Citation>,
    pub total_chars: usize,
    /// Results left out because the budget ran out.
    pub omitted: usize,
}

/// Select results by rank until the budget is exhausted.
///
/// Overlapping parts of the same split unit are collapsed to the better
/// ranked one. Selection stops at the first chunk that does not fit, so a
/// chunk is never cut.
#[must_use]
pub fn assemble(results: &[RankedResult], budget: ContextBudget) -> AssembledContext {
    let limit = budget.as_chars();
    let mut ranked: Vec<&RankedResult> = results.iter().collect();
    ranked.sort_by_key(|r| r.final_rank);

    let mut kept: Vec<&RankedResult> = Vec::new();
    let mut duplicates = 0;
    for r in ranked {
        if kept.iter().any(|k| overlapping_parts(&k.chunk, &r.chunk)) {
            duplicates += 1;
            continue;
        }
        kept.push(r);
    }

    let mut total_chars = 0;
    let mut selected = Vec::new();
    let mut omitted = 0;
    for (i, r) in kept.iter().enumerate() {
        if total_chars + r.chunk.char_count > limit {
            omitted = kept.len() - i;
            break;
        }
        total_chars += r.chunk.char_count;
        selected.push(*r);
    }

    selected.sort_by(|a, b| {
        a.chunk
            .file_path
            .cmp(&b.chunk.file_path)
            .then(a.chunk.start_line.cmp(&b.chunk.start_line))
    });

    let blocks: Vec<TextBlock> = selected
        .iter()
        .map(|r| TextBlock {
            text: r.chunk.text.clone(),
            citation: Citation::from_chunk(&r.chunk),
            score: r.similarity_score,
            rank: r.final_rank,
        })
        .collect();
    let citations = blocks.iter().map(|b| b.citation.clone()).collect();

    tracing::debug!(
        selected = blocks.len(),
        duplicates,
        omitted,
        total_chars,
        limit,
        "context assembled"
    );
    AssembledContext {
        blocks,
        citations,
        total_chars,
        omitted,
    }
}

fn overlapping_parts(a: &Chunk, b: &Chunk) -> bool {
    a.is_partial
        && b.is_partial
        && a.file_path == b.file_path
        && a.parent_name == b.parent_name
        && a.start_line <= b.end_line
        && b.start_line <= a.end_line
}

/// Rough token count at four characters per token.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Numbered human-readable block: header, fenced code, line and relevance footer.
#[must_use]
pub fn format_block(index: usize, block: &TextBlock) -> String {
    let c = &block.citation;
    let lang = c.language.id();
    let mut out = format!(
        "[{index}] {} {}: {} ({lang})\n```{lang}\n{}",
        c.file_path,
        c.unit_type,
        c.name,
        block.text.trim_end_matches('\n')
    );
    let _ = write!(
        out,
        "\n```\n(Lines {}-{}, Relevance: {:.2}%)",
        c.start_line,
        c.end_line,
        block.score * 100.0
    );
    out
}

/// Escape text for a double-quoted attribute value.
fn escape_attr(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '"', '<']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

impl AssembledContext {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        self.total_chars.div_ceil(CHARS_PER_TOKEN)
    }

    /// XML-ish block for injection into a prompt. Empty when nothing was selected.
    #[must_use]
    pub fn render(&self) -> String {
        if self.blocks.is_empty() {
            return String::new();
        }

        let mut out = String::from("<code_context>\n");
        for block in &self.blocks {
            let c = &block.citation;
            let _ = writeln!(
                out,
                "  <chunk file=\"{}\" lines=\"{}-{}\" name=\"{}\" type=\"{}\" language=\"{}\" score=\"{:.2}\">",
                escape_attr(&c.file_path),
                c.start_line,
                c.end_line,
                escape_attr(&c.name),
                c.unit_type,
                c.language,
                block.score,
            );
            out.push_str(block.text.trim_end_matches('\n'));
            out.push_str("\n  </chunk>\n");
        }
        out.push_str("</code_context>");
        out
    }

    /// Numbered blocks joined by blank lines.
    #[must_use]
    pub fn render_plain(&self) -> String {
        self.blocks
            .iter()
            .zip(1..)
            .map(|(b, i)| format_block(i, b))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Chunk names grouped by file.
    #[must_use]
    pub fn file_summary(&self) -> String {
        let mut by_file: BTreeMap<&str, (Lang, Vec<&str>)> = BTreeMap::new();
        for block in &self.blocks {
            by_file
                .entry(block.citation.file_path.as_str())
                .or_insert_with(|| (block.citation.language, Vec::new()))
                .1
                .push(block.citation.name.as_str());
        }

        let mut out = String::from("# Files in Context\n");
        for (file, (lang, names)) in by_file {
            let _ = write!(
                out,
                "\n- {file} ({lang}): {} chunk(s) - {}",
                names.len(),
                names.join(", ")
            );
        }
        out
    }
}
