//! Indentation-scoped splitting for Python.

use std::sync::LazyLock;

use regex::Regex;

use super::{Lines, Span, UnitType, attach_preamble};

static DECL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(async\s+def|def|class)\s+([A-Za-z_]\w*)").unwrap());

const TRIPLE_QUOTES: [&str; 2] = ["\"\"\"", "'''"];

/// Returns `None` when a triple-quoted string is never closed.
pub(super) fn split(lines: &Lines<'_>) -> Option<Vec<Span>> {
    let n = lines.len();
    let in_string = string_state(lines)?;

    let top_level = |i: usize| -> bool {
        !in_string[i]
            && lines
                .get(i)
                .chars()
                .next()
                .is_some_and(|c| !c.is_whitespace())
    };
    let is_comment = |i: usize| lines.get(i).starts_with('#');

    let mut spans = Vec::new();
    let mut floor = 0;
    let mut i = 0;
    while i < n {
        let caps = if top_level(i) {
            DECL_RE.captures(lines.get(i))
        } else {
            None
        };
        let Some(caps) = caps else {
            i += 1;
            continue;
        };
        let unit_type = if caps[1].starts_with("class") {
            UnitType::Class
        } else {
            UnitType::Function
        };
        let name = caps[2].to_owned();

        let start = attach_preamble(lines, i, floor, |j| {
            top_level(j) && (lines.get(j).starts_with('@') || is_comment(j))
        });

        // The header may wrap across lines with brackets closing at column 0.
        let mut depth = 0i32;
        let mut next = i + 1;
        depth += bracket_delta(lines.get(i));
        while next < n {
            if depth <= 0 && top_level(next) && !is_comment(next) {
                break;
            }
            if !in_string[next] {
                depth += bracket_delta(lines.get(next));
            }
            next += 1;
        }

        let mut end = next - 1;
        while end > i && (lines.is_blank(end) || (top_level(end) && is_comment(end))) {
            end -= 1;
        }

        spans.push(Span {
            start,
            end,
            unit_type,
            name,
        });
        floor = end + 1;
        i = next;
    }
    Some(spans)
}

/// `result[i]` is true when line `i` starts inside a triple-quoted string.
fn string_state(lines: &Lines<'_>) -> Option<Vec<bool>> {
    let mut open: Option<&str> = None;
    let mut state = Vec::with_capacity(lines.len());
    for i in 0..lines.len() {
        state.push(open.is_some());
        let line = lines.get(i);
        let mut pos = 0;
        while pos < line.len() {
            match open {
                Some(delim) => match line[pos..].find(delim) {
                    Some(off) => {
                        pos += off + delim.len();
                        open = None;
                    }
                    None => break,
                },
                None => {
                    let next = TRIPLE_QUOTES
                        .iter()
                        .filter_map(|d| line[pos..].find(d).map(|off| (off, *d)))
                        .min_by_key(|(off, _)| *off);
                    match next {
                        Some((off, delim)) => {
                            pos += off + delim.len();
                            open = Some(delim);
                        }
                        None => break,
                    }
                }
            }
        }
    }
    if open.is_some() { None } else { Some(state) }
}

fn bracket_delta(line: &str) -> i32 {
    let code = line.split('#').next().unwrap_or(line);
    code.chars().fold(0, |acc, c| match c {
        '(' | '[' | '{' => acc + 1,
        ')' | ']' | '}' => acc - 1,
        _ => acc,
    })
}
