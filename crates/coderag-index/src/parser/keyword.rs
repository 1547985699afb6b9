//! Keyword-scoped splitting for Ruby: `def`/`class`/`module` closed by `end`.

use std::sync::LazyLock;

use regex::Regex;

use super::{Lines, Span, UnitType, attach_preamble};

static DECL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(def|class|module)\s+([\w.:]+[?!=]?)").unwrap());

/// Returns `None` when a declaration has no matching column-0 `end`.
pub(super) fn split(lines: &Lines<'_>) -> Option<Vec<Span>> {
    let n = lines.len();
    let mut spans = Vec::new();
    let mut floor = 0;
    let mut i = 0;
    while i < n {
        let Some(caps) = DECL_RE.captures(lines.get(i)) else {
            i += 1;
            continue;
        };
        let unit_type = if &caps[1] == "def" {
            UnitType::Function
        } else {
            UnitType::Class
        };
        let name = caps[2].to_owned();
        let end = (i + 1..n).find(|&j| lines.get(j).trim_end() == "end")?;
        let start = attach_preamble(lines, i, floor, |j| lines.get(j).starts_with('#'));
        spans.push(Span {
            start,
            end,
            unit_type,
            name,
        });
        floor = end + 1;
        i = end + 1;
    }
    Some(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_modules_and_methods() {
        let src = "\
require 'json'

# Billing helpers
module Billing
  def self.total(items)
    items.sum
  end
end

def valid?(x)
  !x.nil?
end
";
        let spans = split(&Lines::new(src)).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "Billing");
        assert_eq!(spans[0].unit_type, UnitType::Class);
        assert_eq!((spans[0].start, spans[0].end), (2, 7));
        assert_eq!(spans[1].name, "valid?");
        assert_eq!(spans[1].unit_type, UnitType::Function);
        assert_eq!((spans[1].start, spans[1].end), (9, 11));
    }

    #[test]
    fn missing_end_fails() {
        assert!(split(&Lines::new("class Open\n  def x\n  end\n")).is_none());
    }
}
