//! Heuristic splitting of source files into named semantic units.
//!
//! Each language family has a line-oriented splitter that finds top-level
//! declarations. When a splitter cannot make sense of a file it gives up and
//! the whole file becomes a single `file` unit.

mod brace;
mod details;
mod indent;
mod keyword;
mod markdown;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::languages::{Lang, Splitter};

pub use details::UnitDetails;

/// Kind of a semantic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    Function,
    Class,
    Section,
    File,
}

impl UnitType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Section => "section",
            Self::File => "file",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "class" => Ok(Self::Class),
            "section" => Ok(Self::Section),
            "file" => Ok(Self::File),
            other => Err(format!("unknown unit type: {other}")),
        }
    }
}

/// A named region of a source file. Lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub file_path: String,
    pub language: Lang,
    pub unit_type: UnitType,
    pub name: String,
    pub raw_text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub details: UnitDetails,
}

/// Line range produced by a splitter, 0-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
    pub unit_type: UnitType,
    pub name: String,
}

/// Line index over a text. Line `i` covers `starts[i]..starts[i + 1]`,
/// including its newline.
pub(crate) struct Lines<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> Lines<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        if starts.last() != Some(&text.len()) {
            starts.push(text.len());
        }
        Self { text, starts }
    }

    pub(crate) fn len(&self) -> usize {
        self.starts.len() - 1
    }

    /// Line `i` without its line terminator.
    pub(crate) fn get(&self, i: usize) -> &'a str {
        let line = &self.text[self.starts[i]..self.starts[i + 1]];
        line.strip_suffix('\n')
            .map_or(line, |l| l.strip_suffix('\r').unwrap_or(l))
    }

    /// Exact text of lines `start..=end`, terminators included.
    pub(crate) fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.starts[start]..self.starts[end + 1]]
    }

    pub(crate) fn is_blank(&self, i: usize) -> bool {
        self.get(i).trim().is_empty()
    }
}

/// Split `content` into units.
///
/// Empty or whitespace-only content yields no units.
///
/// # Errors
///
/// Returns [`ParseError::Binary`] if the content contains NUL bytes.
pub fn parse(file_path: &str, content: &str, lang: Lang) -> Result<Vec<SourceUnit>, ParseError> {
    if let Some(offset) = content.find('\0') {
        return Err(ParseError::Binary {
            file_path: file_path.to_owned(),
            offset,
        });
    }
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let lines = Lines::new(content);
    let spans = match lang.splitter() {
        Splitter::Indent => indent::split(&lines),
        Splitter::Brace => brace::split(&lines, lang),
        Splitter::Keyword => keyword::split(&lines),
        Splitter::Headings => Some(markdown::split(&lines)),
        Splitter::WholeFile => None,
    };

    let units: Vec<SourceUnit> = match spans {
        Some(spans) if !spans.is_empty() => spans
            .into_iter()
            .map(|span| {
                let raw_text = lines.slice(span.start, span.end);
                let details = details::extract(raw_text, &span.name, lang, span.unit_type);
                SourceUnit {
                    file_path: file_path.to_owned(),
                    language: lang,
                    unit_type: span.unit_type,
                    name: span.name,
                    raw_text: raw_text.to_owned(),
                    start_line: span.start + 1,
                    end_line: span.end + 1,
                    details,
                }
            })
            .collect(),
        Some(_) => {
            tracing::debug!(file_path, language = %lang, "no units found, indexing whole file");
            vec![whole_file(file_path, content, lang, lines.len())]
        }
        None => {
            if lang.splitter() != Splitter::WholeFile {
                tracing::debug!(file_path, language = %lang, "structural split failed, indexing whole file");
            }
            vec![whole_file(file_path, content, lang, lines.len())]
        }
    };
    Ok(units)
}

fn whole_file(file_path: &str, content: &str, lang: Lang, line_count: usize) -> SourceUnit {
    let name = Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path)
        .to_owned();
    SourceUnit {
        file_path: file_path.to_owned(),
        language: lang,
        unit_type: UnitType::File,
        name,
        raw_text: content.to_owned(),
        start_line: 1,
        end_line: line_count.max(1),
        details: UnitDetails::default(),
    }
}

/// Import lines of a file, newline separated, in file order.
#[must_use]
pub fn extract_imports(content: &str, lang: Lang) -> String {
    let is_import = |line: &str| -> bool {
        match lang {
            Lang::Python => {
                line.starts_with("import ")
                    || (line.starts_with("from ") && line.contains(" import "))
            }
            Lang::JavaScript | Lang::TypeScript => {
                line.starts_with("import ") || line.contains("require(")
            }
            Lang::Rust => line.starts_with("use ") || line.starts_with("pub use "),
            Lang::Java | Lang::Go => line.starts_with("import "),
            Lang::C | Lang::Cpp => line.starts_with("#include"),
            Lang::Ruby => line.starts_with("require ") || line.starts_with("require_relative "),
            _ => false,
        }
    };
    content
        .lines()
        .map(str::trim)
        .filter(|l| is_import(l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Walk back from `decl` over lines that belong to it: doc comments,
/// attributes, decorators. Never crosses `floor` or a blank line.
pub(crate) fn attach_preamble(
    lines: &Lines<'_>,
    decl: usize,
    floor: usize,
    is_preamble: impl Fn(usize) -> bool,
) -> usize {
    let mut start = decl;
    while start > floor && !lines.is_blank(start - 1) && is_preamble(start - 1) {
        start -= 1;
    }
    start
}
