//! Brace-scoped splitting for C-family languages, Go, Java, JS/TS and Rust.

use std::sync::LazyLock;

use regex::Regex;

use super::{Lines, Span, UnitType, attach_preamble};
use crate::languages::Lang;

struct Decl {
    re: Regex,
    unit_type: UnitType,
}

fn decl(pattern: &str, unit_type: UnitType) -> Decl {
    Decl {
        re: Regex::new(pattern).unwrap(),
        unit_type,
    }
}

const RUST_VIS: &str = r"(?:pub(?:\([^)]*\))?\s+)?";

static RUST_DECLS: LazyLock<Vec<Decl>> = LazyLock::new(|| {
    vec![
        decl(
            &format!(
                r#"^{RUST_VIS}(?:(?:const|async|unsafe|extern(?:\s+"[^"]*")?)\s+)*fn\s+([A-Za-z_]\w*)"#
            ),
            UnitType::Function,
        ),
        decl(
            &format!(r"^{RUST_VIS}(?:struct|enum|union|trait)\s+([A-Za-z_]\w*)"),
            UnitType::Class,
        ),
        decl(
            r"^(?:unsafe\s+)?impl(?:\s*<[^{]*?>)?\s+(?:[\w:<>, &']+?\s+for\s+)?([A-Za-z_]\w*)",
            UnitType::Class,
        ),
        decl(
            &format!(r"^{RUST_VIS}mod\s+([A-Za-z_]\w*)\s*\{{"),
            UnitType::Class,
        ),
        decl(r"^macro_rules!\s*([A-Za-z_]\w*)", UnitType::Function),
    ]
});

static GO_DECLS: LazyLock<Vec<Decl>> = LazyLock::new(|| {
    vec![
        decl(
            r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)",
            UnitType::Function,
        ),
        decl(
            r"^type\s+([A-Za-z_]\w*)(?:\[[^\]]*\])?\s+(?:struct|interface)\b",
            UnitType::Class,
        ),
    ]
});

static JAVA_DECLS: LazyLock<Vec<Decl>> = LazyLock::new(|| {
    vec![decl(
        r"^(?:(?:public|protected|private|static|final|abstract|sealed|non-sealed|strictfp)\s+)*(?:class|interface|enum|record|@interface)\s+([A-Za-z_]\w*)",
        UnitType::Class,
    )]
});

static JS_DECLS: LazyLock<Vec<Decl>> = LazyLock::new(|| {
    vec![
        decl(
            r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)",
            UnitType::Function,
        ),
        decl(
            r"^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)",
            UnitType::Class,
        ),
        decl(
            r"^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|[A-Za-z_$][\w$]*\s*=>)",
            UnitType::Function,
        ),
        decl(
            r"^(?:export\s+)?(?:declare\s+)?(?:interface|enum|namespace)\s+([A-Za-z_$][\w$]*)",
            UnitType::Class,
        ),
    ]
});

static C_DECLS: LazyLock<Vec<Decl>> = LazyLock::new(|| {
    vec![
        decl(
            r"^(?:template\s*<[^>]*>\s*)?(?:typedef\s+)?(?:class|struct|union|enum(?:\s+class)?|namespace)\s+([A-Za-z_]\w*)",
            UnitType::Class,
        ),
        decl(
            r"^[A-Za-z_][\w\s\*&:<>,]*?[\s\*&]\**((?:[A-Za-z_]\w*::)*~?[A-Za-z_]\w*)\s*\(",
            UnitType::Function,
        ),
    ]
});

const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "return", "else", "do", "sizeof"];

fn decls(lang: Lang) -> &'static [Decl] {
    match lang {
        Lang::Rust => &RUST_DECLS,
        Lang::Go => &GO_DECLS,
        Lang::Java => &JAVA_DECLS,
        Lang::JavaScript | Lang::TypeScript => &JS_DECLS,
        _ => &C_DECLS,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    BlockComment,
    Str(char),
    RawStr(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Open,
    Close,
    /// `;` outside any brackets.
    Semi,
}

struct Scan {
    /// Brace depth and lexer state at the start of each line.
    depth_at: Vec<i32>,
    state_at: Vec<State>,
    events: Vec<(usize, Event)>,
}

fn scan(lines: &Lines<'_>, lang: Lang) -> Option<Scan> {
    let n = lines.len();
    let quote_strings = matches!(lang, Lang::JavaScript | Lang::TypeScript);
    let preprocessor = matches!(lang, Lang::C | Lang::Cpp);
    let mut state = State::Code;
    let mut depth = 0i32;
    let mut parens = 0i32;
    let mut scan = Scan {
        depth_at: Vec::with_capacity(n),
        state_at: Vec::with_capacity(n),
        events: Vec::new(),
    };

    for i in 0..n {
        scan.depth_at.push(depth);
        scan.state_at.push(state);
        let line = lines.get(i);
        if preprocessor && state == State::Code && line.trim_start().starts_with('#') {
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        let mut k = 0;
        while k < chars.len() {
            let c = chars[k];
            let next = chars.get(k + 1).copied();
            match state {
                State::BlockComment => {
                    if c == '*' && next == Some('/') {
                        state = State::Code;
                        k += 1;
                    }
                }
                State::Str(delim) => {
                    if c == '\\' {
                        k += 1;
                    } else if c == delim {
                        state = State::Code;
                    }
                }
                State::RawStr(hashes) => {
                    if c == '"' && chars[k + 1..].iter().take(hashes).filter(|&&h| h == '#').count() == hashes {
                        state = State::Code;
                        k += hashes;
                    }
                }
                State::Code => match c {
                    '/' if next == Some('/') => break,
                    '/' if next == Some('*') => {
                        state = State::BlockComment;
                        k += 1;
                    }
                    '"' | '`' => state = State::Str(c),
                    '\'' if quote_strings => state = State::Str('\''),
                    '\'' => k += char_literal_len(&chars[k..]),
                    'r' if lang == Lang::Rust
                        && (k == 0 || !is_ident(chars[k - 1]))
                        && raw_string_hashes(&chars[k + 1..]).is_some() =>
                    {
                        let hashes = raw_string_hashes(&chars[k + 1..]).unwrap_or(0);
                        state = State::RawStr(hashes);
                        k += hashes + 1;
                    }
                    '{' => {
                        depth += 1;
                        scan.events.push((i, Event::Open));
                    }
                    '}' => {
                        depth -= 1;
                        if depth < 0 {
                            return None;
                        }
                        scan.events.push((i, Event::Close));
                    }
                    '(' | '[' => parens += 1,
                    ')' | ']' => parens = (parens - 1).max(0),
                    ';' if parens == 0 => scan.events.push((i, Event::Semi)),
                    _ => {}
                },
            }
            k += 1;
        }
        // Plain quotes do not span lines in C-family code.
        if matches!(state, State::Str('\'')) || (lang != Lang::Rust && state == State::Str('"')) {
            state = State::Code;
        }
    }

    if depth != 0 || state != State::Code {
        return None;
    }
    Some(scan)
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Extra chars to skip for a char literal starting at `chars[0] == '\''`.
/// Lifetimes and labels (`'a`) skip nothing.
fn char_literal_len(chars: &[char]) -> usize {
    match chars.get(1) {
        Some('\\') => chars
            .iter()
            .skip(3)
            .position(|&c| c == '\'')
            .map_or(0, |p| p + 3),
        Some(_) if chars.get(2) == Some(&'\'') => 2,
        _ => 0,
    }
}

/// For `r"`, `r#"`, `r##"` returns the number of hashes.
fn raw_string_hashes(after_r: &[char]) -> Option<usize> {
    let hashes = after_r.iter().take_while(|&&c| c == '#').count();
    (after_r.get(hashes) == Some(&'"')).then_some(hashes)
}

fn is_preamble_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("//")
        || t.starts_with("/*")
        || t.starts_with('*')
        || t.starts_with("#[")
        || (t.starts_with('@') && !t.starts_with("@interface"))
}

/// Returns `None` when braces do not balance or a string or comment never closes.
pub(super) fn split(lines: &Lines<'_>, lang: Lang) -> Option<Vec<Span>> {
    let scan = scan(lines, lang)?;
    let table = decls(lang);
    let n = lines.len();
    let mut spans = Vec::new();
    let mut floor = 0;
    let mut ev = 0;
    let mut i = 0;

    while i < n {
        if scan.depth_at[i] != 0 || scan.state_at[i] != State::Code {
            i += 1;
            continue;
        }
        let text = lines.get(i).trim_start();
        let found = table.iter().find_map(|d| {
            d.re.captures(text)
                .map(|caps| (caps[1].to_owned(), d.unit_type))
        });
        let Some((name, unit_type)) = found else {
            i += 1;
            continue;
        };
        if unit_type == UnitType::Function && CONTROL_KEYWORDS.contains(&name.as_str()) {
            i += 1;
            continue;
        }

        while ev < scan.events.len() && scan.events[ev].0 < i {
            ev += 1;
        }
        let mut depth = 0;
        let mut opened = false;
        let mut end = None;
        for &(line, event) in &scan.events[ev..] {
            match event {
                Event::Open => {
                    depth += 1;
                    opened = true;
                }
                Event::Close => {
                    depth -= 1;
                    if opened && depth == 0 {
                        end = Some(line);
                        break;
                    }
                }
                Event::Semi if depth == 0 && !opened => {
                    end = Some(line);
                    break;
                }
                Event::Semi => {}
            }
        }
        let end = end.unwrap_or(i);

        // Prototypes and forward declarations are not units, except Rust
        // item declarations such as `struct Unit;`.
        if opened || lang == Lang::Rust {
            let start = attach_preamble(lines, i, floor, |j| {
                scan.state_at[j] == State::BlockComment || is_preamble_line(lines.get(j))
            });
            spans.push(Span {
                start,
                end,
                unit_type,
                name,
            });
            floor = end + 1;
        }
        i = end + 1;
    }
    Some(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_str(src: &str, lang: Lang) -> Vec<(String, UnitType, usize, usize)> {
        split(&Lines::new(src), lang)
            .unwrap()
            .into_iter()
            .map(|s| (s.name, s.unit_type, s.start, s.end))
            .collect()
    }

    #[test]
    fn rust_items_with_docs_and_attributes() {
        let src = r#"use std::fmt;

/// A point.
#[derive(Debug)]
pub struct Point {
    x: i32,
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.x)
    }
}

pub(crate) async fn load<'a>(s: &'a str) -> char {
    let c = '{';
    c
}

struct Unit;
"#;
        let units = split_str(src, Lang::Rust);
        assert_eq!(
            units,
            vec![
                ("Point".into(), UnitType::Class, 2, 6),
                ("Point".into(), UnitType::Class, 8, 12),
                ("load".into(), UnitType::Function, 14, 17),
                ("Unit".into(), UnitType::Class, 19, 19),
            ]
        );
    }

    #[test]
    fn braces_in_strings_and_comments_ignored() {
        let src = "fn a() {\n    let s = \"}\"; // }\n    /* { */\n    let r = r#\"{\"#;\n}\nfn b() {}\n";
        let units = split_str(src, Lang::Rust);
        assert_eq!(units.len(), 2);
        assert_eq!((units[0].2, units[0].3), (0, 4));
        assert_eq!(units[1].0, "b");
    }

    #[test]
    fn go_funcs_methods_and_types() {
        let src = "package main\n\ntype Server struct {\n\taddr string\n}\n\n// Run starts.\nfunc (s *Server) Run() error {\n\treturn nil\n}\n";
        let units = split_str(src, Lang::Go);
        assert_eq!(
            units,
            vec![
                ("Server".into(), UnitType::Class, 2, 4),
                ("Run".into(), UnitType::Function, 6, 9),
            ]
        );
    }

    #[test]
    fn java_class_with_annotation() {
        let src = "import java.util.List;\n\n@Service\npublic final class Users {\n    void add() { }\n}\n";
        let units = split_str(src, Lang::Java);
        assert_eq!(units, vec![("Users".into(), UnitType::Class, 2, 5)]);
    }

    #[test]
    fn javascript_functions_arrows_and_classes() {
        let src = "const x = 'a{';\n\nexport async function load(id) {\n  return `}${id}`;\n}\n\nconst add = (a, b) => {\n  return a + b;\n};\n\nclass Cart {\n}\n";
        let units = split_str(src, Lang::JavaScript);
        let names: Vec<&str> = units.iter().map(|u| u.0.as_str()).collect();
        assert_eq!(names, vec!["load", "add", "Cart"]);
        assert_eq!((units[1].2, units[1].3), (6, 8));
    }

    #[test]
    fn c_skips_prototypes_and_preprocessor() {
        let src = "#include <stdio.h>\n#define OPEN {\n\nint add(int a, int b);\n\nstatic int add(int a, int b)\n{\n    if (a) { return a; }\n    return b;\n}\n\nstruct node {\n    int v;\n};\n";
        let units = split_str(src, Lang::C);
        assert_eq!(
            units,
            vec![
                ("add".into(), UnitType::Function, 5, 9),
                ("node".into(), UnitType::Class, 11, 13),
            ]
        );
    }

    #[test]
    fn cpp_qualified_method() {
        let src = "void Parser::parse(const std::string& s) {\n}\n";
        let units = split_str(src, Lang::Cpp);
        assert_eq!(units[0].0, "Parser::parse");
    }

    #[test]
    fn unclosed_block_comment_fails() {
        assert!(split(&Lines::new("fn a() {}\n/* open\n"), Lang::Rust).is_none());
    }

    #[test]
    fn extra_closing_brace_fails() {
        assert!(split(&Lines::new("fn a() {}\n}\n"), Lang::Go).is_none());
    }

    #[test]
    fn char_literal_rules() {
        let chars: Vec<char> = "'{'".chars().collect();
        assert_eq!(char_literal_len(&chars), 2);
        let chars: Vec<char> = r"'\''".chars().collect();
        assert_eq!(char_literal_len(&chars), 3);
        let chars: Vec<char> = "'a>".chars().collect();
        assert_eq!(char_literal_len(&chars), 0);
    }
}
