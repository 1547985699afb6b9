//! Declaration details of function and class units: signature, decorators,
//! docstring, parameters and return type.
//!
//! Extraction is line based like the splitters. It never fails; anything it
//! cannot recognise is simply left out.

use crate::languages::{Lang, Splitter};

use super::UnitType;

const MAX_SIGNATURE_LINES: usize = 12;
const MAX_DOCSTRING_CHARS: usize = 500;
const MAX_SUMMARY_CHARS: usize = 200;

/// Searchable details of a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitDetails {
    /// Declaration header with whitespace collapsed, body excluded.
    pub signature: Option<String>,
    /// Decorators, attributes or annotations, in source order.
    pub decorators: Vec<String>,
    pub docstring: Option<String>,
    /// Parameters as written, receivers (`self`, `cls`) excluded.
    pub params: Vec<String>,
    pub return_type: Option<String>,
}

impl UnitDetails {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// First docstring line, capped for display.
    #[must_use]
    pub fn summary(&self) -> Option<String> {
        let first = self.docstring.as_deref()?.lines().next()?.trim();
        (!first.is_empty()).then(|| first.chars().take(MAX_SUMMARY_CHARS).collect())
    }
}

pub(crate) fn extract(
    raw_text: &str,
    name: &str,
    lang: Lang,
    unit_type: UnitType,
) -> UnitDetails {
    if !matches!(unit_type, UnitType::Function | UnitType::Class) {
        return UnitDetails::default();
    }
    let lines: Vec<&str> = raw_text.lines().collect();
    let mut details = UnitDetails::default();
    let mut doc = Vec::new();

    let mut in_block = false;
    let mut decl = None;
    for (i, line) in lines.iter().enumerate() {
        let t = line.trim();
        if in_block {
            let (body, closed) = t.find("*/").map_or((t, false), |p| (&t[..p], true));
            push_doc(&mut doc, body.trim_start_matches('*'));
            in_block = !closed;
            continue;
        }
        if t.is_empty() {
            continue;
        }
        if is_decorator(t, lang) {
            details.decorators.push(t.to_owned());
            continue;
        }
        if let Some(text) = line_comment(t, lang) {
            push_doc(&mut doc, text);
            continue;
        }
        if lang.splitter() == Splitter::Brace && t.starts_with("/*") {
            let rest = t.trim_start_matches("/*").trim_start_matches('*');
            match rest.find("*/") {
                Some(p) => push_doc(&mut doc, &rest[..p]),
                None => {
                    push_doc(&mut doc, rest);
                    in_block = true;
                }
            }
            continue;
        }
        decl = Some(i);
        break;
    }
    let Some(decl) = decl else {
        return details;
    };

    let (signature, header_end) = header(&lines, decl, lang);
    if lang == Lang::Python {
        doc = python_docstring(&lines[header_end + 1..]);
    }
    if !doc.is_empty() {
        let joined = doc.join("\n");
        details.docstring = Some(joined.trim().chars().take(MAX_DOCSTRING_CHARS).collect());
    }
    if unit_type == UnitType::Function {
        let (params, return_type) = params_and_return(&signature, name, lang);
        details.params = params;
        details.return_type = return_type;
    }
    details.signature = Some(signature).filter(|s| !s.is_empty());
    details
}

fn push_doc(doc: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        doc.push(text.to_owned());
    }
}

fn is_decorator(t: &str, lang: Lang) -> bool {
    match lang {
        Lang::Python => t.starts_with('@'),
        Lang::Rust => t.starts_with("#[") || t.starts_with("#!["),
        Lang::Java | Lang::JavaScript | Lang::TypeScript => t
            .strip_prefix('@')
            .and_then(|r| r.chars().next())
            .is_some_and(char::is_alphabetic),
        _ => false,
    }
}

/// Text of a comment line that may document the declaration below it.
/// Comments that never document (plain `//` in Rust, `#` in Python) yield
/// an empty string so they are skipped without ending the preamble.
fn line_comment(t: &str, lang: Lang) -> Option<&str> {
    match lang {
        Lang::Rust => {
            let rest = t.strip_prefix("//")?;
            Some(
                rest.strip_prefix('/')
                    .or_else(|| rest.strip_prefix('!'))
                    .unwrap_or(""),
            )
        }
        Lang::Python => t.strip_prefix('#').map(|_| ""),
        Lang::Ruby => t.strip_prefix('#'),
        _ if lang.splitter() == Splitter::Brace => {
            t.strip_prefix("//").map(|r| r.trim_start_matches('/'))
        }
        _ => None,
    }
}

/// Declaration header starting at `decl`, and the index of its last line.
fn header(lines: &[&str], decl: usize, lang: Lang) -> (String, usize) {
    if lang == Lang::Ruby {
        return (normalize(lines[decl]), decl);
    }
    let mut parts: Vec<&str> = Vec::new();
    let mut depth = 0i32;
    for (i, line) in lines.iter().enumerate().skip(decl).take(MAX_SIGNATURE_LINES) {
        let mut cut = None;
        for (pos, c) in line.char_indices() {
            match c {
                '(' | '[' => depth += 1,
                ')' | ']' => depth -= 1,
                ':' if lang == Lang::Python && depth <= 0 => {
                    cut = Some(pos);
                    break;
                }
                '{' | ';' if lang != Lang::Python && depth <= 0 => {
                    cut = Some(pos);
                    break;
                }
                _ => {}
            }
        }
        if let Some(pos) = cut {
            parts.push(&line[..pos]);
            return (normalize(&parts.join(" ")), i);
        }
        parts.push(line);
    }
    (normalize(lines[decl]), decl)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("( ", "(")
        .replace(" )", ")")
        .replace(",)", ")")
}

fn python_docstring(body: &[&str]) -> Vec<String> {
    let Some(first) = body.iter().map(|l| l.trim()).find(|l| !l.is_empty()) else {
        return Vec::new();
    };
    let Some(quote) = ["\"\"\"", "'''"].into_iter().find(|q| first.starts_with(q)) else {
        return Vec::new();
    };
    let rest = &first[quote.len()..];
    if let Some(end) = rest.find(quote) {
        return vec![rest[..end].trim().to_owned()];
    }

    let mut doc = vec![rest.trim().to_owned()];
    let start = body.iter().position(|l| !l.trim().is_empty()).unwrap_or(0) + 1;
    for line in &body[start..] {
        let t = line.trim();
        if let Some(end) = t.find(quote) {
            doc.push(t[..end].trim().to_owned());
            break;
        }
        doc.push(t.to_owned());
    }
    doc
}

/// Byte range of the parenthesised group opening at or after `from`.
fn paren_group(sig: &str, from: usize) -> Option<(usize, usize)> {
    let open = from + sig.get(from..)?.find('(')?;
    let mut depth = 0i32;
    for (pos, c) in sig[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((open, open + pos));
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas outside of any brackets.
fn split_top_level(inner: &str, angle: bool) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut prev = ' ';
    for (pos, c) in inner.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '<' if angle => depth += 1,
            '>' if angle && prev != '-' && prev != '=' => depth -= 1,
            ',' if depth == 0 => {
                out.push(&inner[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
        prev = c;
    }
    out.push(&inner[start..]);
    out
}

/// Parameters come from the first parenthesised group after the unit name,
/// which skips `pub(crate)` and Go receivers.
fn params_and_return(sig: &str, name: &str, lang: Lang) -> (Vec<String>, Option<String>) {
    let after_name = (!name.is_empty())
        .then(|| sig.find(&format!("{name}(")).or_else(|| sig.find(name)))
        .flatten()
        .map(|p| p + name.len());
    let group = match after_name {
        Some(from) => paren_group(sig, from),
        None if lang == Lang::Go && sig.starts_with("func (") => {
            paren_group(sig, 0).and_then(|(_, close)| paren_group(sig, close + 1))
        }
        None => paren_group(sig, 0),
    };
    let Some((open, close)) = group else {
        return (Vec::new(), None);
    };

    let params = split_top_level(&sig[open + 1..close], lang != Lang::Python)
        .into_iter()
        .map(str::trim)
        .filter(|p| {
            !p.is_empty()
                && !matches!(
                    *p,
                    "self" | "&self" | "&mut self" | "mut self" | "cls" | "*" | "/"
                )
        })
        .map(str::to_owned)
        .collect();

    let rest = sig[close + 1..].trim();
    let return_type = match lang {
        Lang::Python | Lang::Rust => rest
            .strip_prefix("->")
            .map(|r| r.split(" where ").next().unwrap_or(r)),
        Lang::TypeScript => rest
            .strip_prefix(':')
            .map(|r| r.trim().trim_end_matches("=>")),
        Lang::Go => Some(rest),
        _ => None,
    }
    .map(str::trim)
    .filter(|r| !r.is_empty())
    .map(str::to_owned);

    (params, return_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_function_with_decorators_and_docstring() {
        let src = "@app.route(\"/login\")\n@requires_auth\ndef login(self, user: str, password: str = \"x\") -> bool:\n    \"\"\"Check the credentials.\n\n    Returns True on success.\n    \"\"\"\n    return True\n";
        let d = extract(src, "login", Lang::Python, UnitType::Function);
        assert_eq!(d.decorators, vec!["@app.route(\"/login\")", "@requires_auth"]);
        assert_eq!(
            d.signature.as_deref(),
            Some("def login(self, user: str, password: str = \"x\") -> bool")
        );
        assert_eq!(d.params, vec!["user: str", "password: str = \"x\""]);
        assert_eq!(d.return_type.as_deref(), Some("bool"));
        assert_eq!(
            d.docstring.as_deref(),
            Some("Check the credentials.\n\nReturns True on success.")
        );
        assert_eq!(d.summary().as_deref(), Some("Check the credentials."));
    }

    #[test]
    fn python_wrapped_header_and_one_line_docstring() {
        let src = "async def fetch(\n    url: str,\n    retries: Dict[str, int],\n) -> Response:\n    '''Fetch a URL.'''\n    pass\n";
        let d = extract(src, "fetch", Lang::Python, UnitType::Function);
        assert_eq!(
            d.signature.as_deref(),
            Some("async def fetch(url: str, retries: Dict[str, int]) -> Response")
        );
        assert_eq!(d.params, vec!["url: str", "retries: Dict[str, int]"]);
        assert_eq!(d.docstring.as_deref(), Some("Fetch a URL."));
    }

    #[test]
    fn python_class_has_signature_but_no_params() {
        let d = extract("class Repo(Base):\n    pass\n", "Repo", Lang::Python, UnitType::Class);
        assert_eq!(d.signature.as_deref(), Some("class Repo(Base)"));
        assert!(d.params.is_empty());
        assert!(d.docstring.is_none());
    }

    #[test]
    fn rust_doc_comments_attributes_and_generics() {
        let src = "/// Opens a pool.\n/// Retries once.\n#[must_use]\npub fn connect(&self, url: &str, opts: Options<'_, u8>) -> Result<Pool, Error> {\n    todo!()\n}\n";
        let d = extract(src, "connect", Lang::Rust, UnitType::Function);
        assert_eq!(d.docstring.as_deref(), Some("Opens a pool.\nRetries once."));
        assert_eq!(d.decorators, vec!["#[must_use]"]);
        assert_eq!(
            d.signature.as_deref(),
            Some("pub fn connect(&self, url: &str, opts: Options<'_, u8>) -> Result<Pool, Error>")
        );
        assert_eq!(d.params, vec!["url: &str", "opts: Options<'_, u8>"]);
        assert_eq!(d.return_type.as_deref(), Some("Result<Pool, Error>"));
    }

    #[test]
    fn rust_plain_comments_are_not_docs() {
        let src = "// helper\nfn run(f: impl Fn(u8) -> u8, n: u8) {}\n";
        let d = extract(src, "run", Lang::Rust, UnitType::Function);
        assert!(d.docstring.is_none());
        assert_eq!(d.params, vec!["f: impl Fn(u8) -> u8", "n: u8"]);
        assert!(d.return_type.is_none());
    }

    #[test]
    fn rust_restricted_visibility_is_not_a_parameter_list() {
        let src = "pub(crate) async fn load<'a>(s: &'a str) -> char {\n    'x'\n}\n";
        let d = extract(src, "load", Lang::Rust, UnitType::Function);
        assert_eq!(d.params, vec!["s: &'a str"]);
        assert_eq!(d.return_type.as_deref(), Some("char"));
    }

    #[test]
    fn typescript_jsdoc_and_return_type() {
        let src = "/** Adds two numbers. */\nexport function add(a: number, b: number): number {\n  return a + b;\n}\n";
        let d = extract(src, "add", Lang::TypeScript, UnitType::Function);
        assert_eq!(d.docstring.as_deref(), Some("Adds two numbers."));
        assert_eq!(
            d.signature.as_deref(),
            Some("export function add(a: number, b: number): number")
        );
        assert_eq!(d.return_type.as_deref(), Some("number"));
    }

    #[test]
    fn javascript_block_comment_over_several_lines() {
        let src = "/**\n * Greets a user.\n * @param name who\n */\nfunction greet(name) {\n}\n";
        let d = extract(src, "greet", Lang::JavaScript, UnitType::Function);
        assert_eq!(d.docstring.as_deref(), Some("Greets a user.\n@param name who"));
        assert_eq!(d.params, vec!["name"]);
    }

    #[test]
    fn go_method_skips_receiver() {
        let src = "// Handle serves a request.\nfunc (s *Server) Handle(w http.ResponseWriter, r *http.Request) error {\n\treturn nil\n}\n";
        let d = extract(src, "Handle", Lang::Go, UnitType::Function);
        assert_eq!(d.param_count(), 2);
        assert_eq!(d.params, vec!["w http.ResponseWriter", "r *http.Request"]);
        assert_eq!(d.return_type.as_deref(), Some("error"));
        assert_eq!(d.docstring.as_deref(), Some("Handle serves a request."));
    }

    #[test]
    fn java_annotation_and_brace_on_next_line() {
        let src = "@Override\npublic String toString()\n{\n    return name;\n}\n";
        let d = extract(src, "toString", Lang::Java, UnitType::Function);
        assert_eq!(d.decorators, vec!["@Override"]);
        assert_eq!(d.signature.as_deref(), Some("public String toString()"));
        assert!(d.params.is_empty());
    }

    #[test]
    fn ruby_comment_is_docstring() {
        let src = "# Adds numbers.\ndef add(a, b)\n  a + b\nend\n";
        let d = extract(src, "add", Lang::Ruby, UnitType::Function);
        assert_eq!(d.signature.as_deref(), Some("def add(a, b)"));
        assert_eq!(d.params, vec!["a", "b"]);
        assert_eq!(d.docstring.as_deref(), Some("Adds numbers."));
    }

    #[test]
    fn sections_and_files_have_no_details() {
        assert!(extract("# Title\ntext\n", "Title", Lang::Markdown, UnitType::Section).is_empty());
        assert!(extract("def a():\n    pass\n", "a", Lang::Python, UnitType::File).is_empty());
    }
}
