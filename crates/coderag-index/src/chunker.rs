//! Size-bounded chunking of semantic units with line overlap.

use coderag_store::{FieldValue, Metadata};

use crate::languages::Lang;
use crate::parser::{Lines, SourceUnit, UnitDetails, UnitType};

const CHARS_PER_TOKEN: usize = 4;
const PREVIEW_CHARS: usize = 100;

const SCORE_BLANK: u8 = 10;
const SCORE_COMMENT: u8 = 8;
const SCORE_DEDENT: u8 = 7;
const SCORE_BLOCK_END: u8 = 6;
const SCORE_PLAIN: u8 = 1;

/// Chunker configuration, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Units longer than this are split (default: 4000).
    pub max_chars: usize,
    /// Approximate overlap between consecutive parts (default: 200).
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::from_tokens(1000, 50)
    }
}

impl ChunkerConfig {
    #[must_use]
    pub fn from_tokens(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_chars: max_tokens * CHARS_PER_TOKEN,
            overlap_chars: overlap_tokens * CHARS_PER_TOKEN,
        }
    }
}

/// Final indexable piece of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub unit_type: UnitType,
    /// `name_partN` for split units, otherwise the unit name.
    pub name: String,
    pub language: Lang,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub char_count: usize,
    pub token_estimate: usize,
    pub is_partial: bool,
    /// 0 when the unit was not split, counting from 1 otherwise.
    pub part_number: u32,
    pub parent_name: String,
    pub is_uncommitted: bool,
    pub commit_hash: Option<String>,
    pub content_hash: String,
    pub preview: String,
    /// Declaration details of the unit, shared by all of its parts.
    pub details: UnitDetails,
}

/// Stable chunk id: UUID v5 over path, unit name, part number and text hash.
#[must_use]
pub fn chunk_id(file_path: &str, unit_name: &str, part_number: u32, content_hash: &str) -> String {
    let key = format!("{file_path}\0{unit_name}\0{part_number}\0{content_hash}");
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

impl Chunk {
    fn new(unit: &SourceUnit, text: &str, lines: (usize, usize), part_number: u32) -> Self {
        let content_hash = blake3::hash(text.as_bytes()).to_hex().to_string();
        let char_count = text.chars().count();
        let name = if part_number == 0 {
            unit.name.clone()
        } else {
            format!("{}_part{part_number}", unit.name)
        };
        Self {
            id: chunk_id(&unit.file_path, &unit.name, part_number, &content_hash),
            file_path: unit.file_path.clone(),
            unit_type: unit.unit_type,
            name,
            language: unit.language,
            text: text.to_owned(),
            start_line: lines.0,
            end_line: lines.1,
            char_count,
            token_estimate: char_count.div_ceil(CHARS_PER_TOKEN),
            is_partial: part_number > 0,
            part_number,
            parent_name: unit.name.clone(),
            is_uncommitted: false,
            commit_hash: None,
            content_hash,
            preview: text.chars().take(PREVIEW_CHARS).collect(),
            details: unit.details.clone(),
        }
    }

    /// Scalar payload stored next to the vector.
    #[must_use]
    pub fn to_metadata(&self) -> Metadata {
        let int = |v: usize| FieldValue::Integer(i64::try_from(v).unwrap_or(i64::MAX));
        let mut m = Metadata::from([
            ("file_path".to_owned(), FieldValue::from(self.file_path.as_str())),
            ("unit_type".to_owned(), FieldValue::from(self.unit_type.as_str())),
            ("name".to_owned(), FieldValue::from(self.name.as_str())),
            ("language".to_owned(), FieldValue::from(self.language.id())),
            ("start_line".to_owned(), int(self.start_line)),
            ("end_line".to_owned(), int(self.end_line)),
            ("char_count".to_owned(), int(self.char_count)),
            ("token_estimate".to_owned(), int(self.token_estimate)),
            ("is_partial".to_owned(), FieldValue::Bool(self.is_partial)),
            (
                "part_number".to_owned(),
                FieldValue::Integer(i64::from(self.part_number)),
            ),
            ("parent_name".to_owned(), FieldValue::from(self.parent_name.as_str())),
            ("is_uncommitted".to_owned(), FieldValue::Bool(self.is_uncommitted)),
            ("content_hash".to_owned(), FieldValue::from(self.content_hash.as_str())),
            ("preview".to_owned(), FieldValue::from(self.preview.as_str())),
        ]);
        if let Some(hash) = &self.commit_hash {
            m.insert("commit_hash".to_owned(), FieldValue::from(hash.as_str()));
        }
        self.details_metadata(&mut m, int);
        m
    }

    fn details_metadata(&self, m: &mut Metadata, int: impl Fn(usize) -> FieldValue) {
        let d = &self.details;
        let mut text = |key: &str, value: Option<&str>| {
            if let Some(value) = value {
                m.insert(key.to_owned(), FieldValue::from(value));
            }
        };
        text("signature", d.signature.as_deref());
        text("signature_return", d.return_type.as_deref());
        text("docstring", d.docstring.as_deref());
        let params = d.params.join("\n");
        text("signature_params", (!params.is_empty()).then_some(params.as_str()));
        let decorators = d.decorators.join("\n");
        text("decorators", (!decorators.is_empty()).then_some(decorators.as_str()));
        if d.signature.is_some() {
            m.insert("param_count".to_owned(), int(d.param_count()));
        }
    }

    /// Rebuild a chunk from a stored point. Returns `None` if required
    /// fields are missing or malformed.
    #[must_use]
    pub fn from_stored(id: &str, text: &str, m: &Metadata) -> Option<Self> {
        let s = |k: &str| m.get(k).and_then(FieldValue::as_str).map(str::to_owned);
        let n = |k: &str| {
            m.get(k)
                .and_then(FieldValue::as_i64)
                .and_then(|v| usize::try_from(v).ok())
        };
        let b = |k: &str| m.get(k).and_then(FieldValue::as_bool).unwrap_or(false);
        let char_count = n("char_count").unwrap_or_else(|| text.chars().count());
        let list = |k: &str| -> Vec<String> {
            s(k).map(|v| v.split('\n').map(str::to_owned).collect())
                .unwrap_or_default()
        };
        let details = UnitDetails {
            signature: s("signature"),
            decorators: list("decorators"),
            docstring: s("docstring"),
            params: list("signature_params"),
            return_type: s("signature_return"),
        };
        Some(Self {
            id: id.to_owned(),
            file_path: s("file_path")?,
            unit_type: s("unit_type")?.parse().ok()?,
            name: s("name")?,
            language: Lang::from_id(&s("language")?)?,
            text: text.to_owned(),
            start_line: n("start_line")?,
            end_line: n("end_line")?,
            char_count,
            token_estimate: n("token_estimate")
                .unwrap_or_else(|| char_count.div_ceil(CHARS_PER_TOKEN)),
            is_partial: b("is_partial"),
            part_number: n("part_number")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0),
            parent_name: s("parent_name").unwrap_or_default(),
            is_uncommitted: b("is_uncommitted"),
            commit_hash: s("commit_hash"),
            content_hash: s("content_hash").unwrap_or_default(),
            preview: s("preview").unwrap_or_default(),
            details,
        })
    }
}

/// Chunk a unit, splitting it when longer than `config.max_chars`.
#[must_use]
pub fn chunk_unit(unit: &SourceUnit, config: &ChunkerConfig) -> Vec<Chunk> {
    let total_chars = unit.raw_text.chars().count();
    if total_chars <= config.max_chars {
        return vec![Chunk::new(
            unit,
            &unit.raw_text,
            (unit.start_line, unit.end_line),
            0,
        )];
    }

    let lines = Lines::new(&unit.raw_text);
    if lines.len() <= 1 {
        return split_by_chars(unit, config);
    }

    line_windows(&lines, total_chars, unit.language, config)
        .into_iter()
        .zip(1u32..)
        .map(|((first, last), part)| {
            Chunk::new(
                unit,
                lines.slice(first, last),
                (unit.start_line + first, unit.start_line + last),
                part,
            )
        })
        .collect()
}

/// Chunk every unit in order.
#[must_use]
pub fn chunk_units(units: &[SourceUnit], config: &ChunkerConfig) -> Vec<Chunk> {
    units.iter().flat_map(|u| chunk_unit(u, config)).collect()
}

/// Inclusive 0-based line ranges of the parts.
fn line_windows(
    lines: &Lines<'_>,
    total_chars: usize,
    lang: Lang,
    config: &ChunkerConfig,
) -> Vec<(usize, usize)> {
    let n = lines.len();
    let avg = total_chars.div_ceil(n).max(1);
    let lines_per_chunk = (config.max_chars / avg).max(1);
    let overlap = (config.overlap_chars / avg).min(lines_per_chunk - 1);

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let mut end = (start + lines_per_chunk).min(n);
        if end < n {
            end = snap_end(lines, lang, start, end, overlap);
        }
        windows.push((start, end - 1));
        if end >= n {
            break;
        }
        start = end - overlap;
    }
    windows
}

/// Move an exclusive window end earlier, within the last fifth of the
/// window, to a boundary with a strictly better score.
fn snap_end(lines: &Lines<'_>, lang: Lang, start: usize, end: usize, overlap: usize) -> usize {
    let width = end - start;
    let reach = width / 5;
    let lowest = (end - reach).max(start + overlap + 1);
    let mut best = end;
    let mut best_score = split_score(lines, lang, end);
    for candidate in (lowest..end).rev() {
        let score = split_score(lines, lang, candidate);
        if score > best_score {
            best = candidate;
            best_score = score;
        }
    }
    best
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Quality of splitting between line `at - 1` and line `at`.
fn split_score(lines: &Lines<'_>, lang: Lang, at: usize) -> u8 {
    let prev = lines.get(at - 1);
    let next = lines.get(at);
    if prev.trim().is_empty() {
        return SCORE_BLANK;
    }
    let next_trimmed = next.trim_start();
    if lang
        .comment_prefixes()
        .iter()
        .any(|p| next_trimmed.starts_with(p))
    {
        return SCORE_COMMENT;
    }
    if !next_trimmed.is_empty() && indent_of(next) < indent_of(prev) {
        return SCORE_DEDENT;
    }
    let prev_trimmed = prev.trim();
    if prev_trimmed.starts_with('}')
        || matches!(prev_trimmed, ")" | "]")
        || prev_trimmed.starts_with("return")
        || prev_trimmed == "end"
    {
        return SCORE_BLOCK_END;
    }
    SCORE_PLAIN
}

fn split_by_chars(unit: &SourceUnit, config: &ChunkerConfig) -> Vec<Chunk> {
    let bounds: Vec<usize> = unit
        .raw_text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(unit.raw_text.len()))
        .collect();
    let total = bounds.len() - 1;
    let max = config.max_chars.max(1);
    let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut part = 1u32;
    loop {
        let end = (start + max).min(total);
        let text = &unit.raw_text[bounds[start]..bounds[end]];
        chunks.push(Chunk::new(
            unit,
            text,
            (unit.start_line, unit.end_line),
            part,
        ));
        if end >= total {
            break;
        }
        start += step;
        part += 1;
    }
    chunks
}
