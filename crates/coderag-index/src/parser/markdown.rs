//! Heading-based sections for Markdown.

use super::{Lines, Span, UnitType};

fn heading(line: &str) -> Option<String> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let title = after.trim().trim_end_matches('#').trim_end();
    Some(if title.is_empty() {
        "section".to_owned()
    } else {
        title.to_owned()
    })
}

fn fence(line: &str) -> Option<&'static str> {
    let t = line.trim_start();
    if t.starts_with("```") {
        Some("```")
    } else if t.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Sections start at ATX headings outside fenced code blocks.
pub(super) fn split(lines: &Lines<'_>) -> Vec<Span> {
    let n = lines.len();
    let mut headings: Vec<(usize, String)> = Vec::new();
    let mut open_fence: Option<&str> = None;
    for i in 0..n {
        let line = lines.get(i);
        match (open_fence, fence(line)) {
            (Some(open), Some(f)) if open == f => open_fence = None,
            (Some(_), _) => {}
            (None, Some(f)) => open_fence = Some(f),
            (None, None) => {
                if let Some(title) = heading(line) {
                    headings.push((i, title));
                }
            }
        }
    }

    let mut spans = Vec::new();
    let first = headings.first().map_or(n, |(i, _)| *i);
    if (0..first).any(|i| !lines.is_blank(i)) {
        spans.push(Span {
            start: 0,
            end: first - 1,
            unit_type: UnitType::Section,
            name: "intro".to_owned(),
        });
    }
    for (k, (start, title)) in headings.iter().enumerate() {
        let end = headings.get(k + 1).map_or(n, |(next, _)| *next) - 1;
        spans.push(Span {
            start: *start,
            end,
            unit_type: UnitType::Section,
            name: title.clone(),
        });
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intro_and_sections() {
        let src = "Some intro.\n\n# Install\nrun it\n\n## Usage ##\n```sh\n# not a heading\n```\n";
        let spans = split(&Lines::new(src));
        let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["intro", "Install", "Usage"]);
        assert_eq!((spans[0].start, spans[0].end), (0, 1));
        assert_eq!((spans[1].start, spans[1].end), (2, 4));
        assert_eq!((spans[2].start, spans[2].end), (5, 8));
    }

    #[test]
    fn no_headings_is_single_intro() {
        let spans = split(&Lines::new("just text\nmore\n"));
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "intro");
    }

    #[test]
    fn heading_rules() {
        assert_eq!(heading("# Title"), Some("Title".into()));
        assert_eq!(heading("   ### Deep ###"), Some("Deep".into()));
        assert_eq!(heading("#"), Some("section".into()));
        assert_eq!(heading("#hashtag"), None);
        assert_eq!(heading("    # code"), None);
        assert_eq!(heading("####### seven"), None);
    }
}
