//! Wraps everything after the last top-level import in an async IIFE so
//! top-level `await` works under the CommonJS output format.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static IMPORT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^import(\s|\{|\*|"|')"#).expect("Invalid regex"));
static SIDE_EFFECT_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^import\s*["']"#).expect("Invalid regex"));
static FROM_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bfrom\s*["']"#).expect("Invalid regex"));

pub const WRAP_OPEN: &str = "/**/(async ()=>{\n";
pub const WRAP_CLOSE: &str = "\n/**/})();";

/// Source with its body wrapped, or the source untouched when it has no
/// top-level import (or nothing follows the last one).
pub fn wrap_top_level(source: &str) -> Cow<'_, str> {
    let Some(split) = body_start(source) else {
        return Cow::Borrowed(source);
    };
    let (head, body) = source.split_at(split);

    let mut out = String::with_capacity(source.len() + WRAP_OPEN.len() + WRAP_CLOSE.len());
    out.push_str(head);
    out.push_str(WRAP_OPEN);
    out.push_str(body);
    out.push_str(WRAP_CLOSE);
    Cow::Owned(out)
}

/// Byte offset just past the newline that ends the last top-level import
fn body_start(source: &str) -> Option<usize> {
    // (line start offset, line text) for every line, newline excluded
    let mut lines = Vec::new();
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        lines.push((offset, line.trim_end_matches(['\n', '\r'])));
        offset += line.len();
    }

    let mut last_end: Option<usize> = None;
    let mut i = 0;
    while i < lines.len() {
        let (_, text) = lines[i];
        if !IMPORT_START.is_match(text) {
            i += 1;
            continue;
        }
        let end = import_end(&lines, i);
        last_end = Some(end);
        i = end + 1;
    }

    let end = last_end?;
    let (start, text) = lines[end];
    let after_line = start + text.len();
    // an import on the final line without a newline leaves nothing to wrap
    let rest = &source[after_line..];
    let newline_len = if rest.starts_with("\r\n") {
        2
    } else if rest.starts_with('\n') {
        1
    } else {
        return None;
    };
    Some(after_line + newline_len)
}

/// Index of the line an import statement starting at `start` ends on
fn import_end(lines: &[(usize, &str)], start: usize) -> usize {
    let first = lines[start].1;
    if SIDE_EFFECT_IMPORT.is_match(first)
        || FROM_CLAUSE.is_match(first)
        || first.trim_end().ends_with(';')
        || first.contains("require(")
    {
        return start;
    }
    for (i, (_, text)) in lines.iter().enumerate().skip(start + 1) {
        if FROM_CLAUSE.is_match(text) || text.trim_end().ends_with(';') {
            return i;
        }
    }
    lines.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_after_last_import() {
        let src = "import a from \"a\";\nimport { b } from 'b'\nconst x = await a();\n";
        let out = wrap_top_level(src);
        assert_eq!(
            out,
            "import a from \"a\";\nimport { b } from 'b'\n/**/(async ()=>{\nconst x = await a();\n\n/**/})();"
        );
    }

    #[test]
    fn test_no_import_is_pass_through() {
        let src = "const v = await arg('x');\n";
        assert!(matches!(wrap_top_level(src), Cow::Borrowed(s) if s == src));
    }

    #[test]
    fn test_multi_line_import() {
        let src = "import {\n  one,\n  two,\n} from \"lib\";\nrun();";
        let out = wrap_top_level(src);
        assert!(out.starts_with("import {\n  one,\n  two,\n} from \"lib\";\n/**/(async ()=>{\nrun();"));
        assert!(out.ends_with(WRAP_CLOSE));
    }

    #[test]
    fn test_indented_and_dynamic_imports_are_not_top_level() {
        let src = "import fs from 'fs'\nfunction f() {\n  import('x')\n}\nconst importer = 1;\n";
        let out = wrap_top_level(src);
        assert!(out.starts_with("import fs from 'fs'\n/**/(async ()=>{\nfunction f()"));
    }

    #[test]
    fn test_import_on_last_line_is_pass_through() {
        let src = "import 'side-effect'";
        assert_eq!(wrap_top_level(src), src);
    }
}
