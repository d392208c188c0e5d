//! Doc-comment metadata extraction
//!
//! Scripts declare metadata in `/** ... */` blocks:
//!
//! ```typescript
//! /**
//!  * @name Greet
//!  * @description Says hello
//!  * @author Ada <https://github.com/ada>
//!  * @uses clipboard, notifications
//!  * @shortcut Ctrl+Alt+G
//!  * @schedule 0 9 * * *
//!  */
//! ```
//!
//! The first occurrence of each tag wins across all blocks.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{Author, ScriptInfo};

static DOC_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*\*([\s\S]*?)\*/").expect("Invalid regex"));
static TAG_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\*?\s*@(\w+)(?:[ \t]+(.*?))?\s*$").expect("Invalid regex"));
static AUTHOR_ANGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*<([^<>]+)>\s*$").expect("Invalid regex"));
static GITHUB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?github\.com/([A-Za-z0-9-]+)/?").expect("Invalid regex")
});
static TWITTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|mobile\.)?(?:twitter|x)\.com/([A-Za-z0-9_]+)/?")
        .expect("Invalid regex")
});
static YOUTUBE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?youtube\.com/(?:@|c/|user/)([A-Za-z0-9_.-]+)/?")
        .expect("Invalid regex")
});

/// Parse metadata for `file` (e.g. `greet.ts`) from its source text.
pub fn parse_script_info(file: &str, content: &str) -> ScriptInfo {
    let mut info = ScriptInfo {
        file: file.to_string(),
        ..Default::default()
    };
    let mut name = None;

    for block in DOC_BLOCK.captures_iter(content) {
        for line in block[1].lines() {
            let Some(tag) = TAG_LINE.captures(line) else {
                continue;
            };
            let value = tag.get(2).map(|v| v.as_str().trim()).unwrap_or("");
            match &tag[1] {
                "name" if name.is_none() && !value.is_empty() => name = Some(value.to_string()),
                "description" if info.description.is_none() && !value.is_empty() => {
                    info.description = Some(value.to_string())
                }
                "author" if info.author.is_none() && !value.is_empty() => {
                    info.author = Some(parse_author(value))
                }
                "uses" if info.uses.is_empty() => {
                    info.uses = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                }
                "shortcut" if info.shortcut.is_none() && !value.is_empty() => {
                    info.shortcut = Some(value.to_string())
                }
                "schedule" if info.schedule.is_none() && !value.is_empty() => {
                    info.schedule = Some(value.to_string())
                }
                "hide" => info.hidden = !matches!(value, "false" | "no" | "0"),
                _ => {}
            }
        }
    }

    info.name = name.unwrap_or_else(|| file_stem(file).to_string());
    info
}

/// `Name <url>`, `Name url` or just `Name`
pub fn parse_author(value: &str) -> Author {
    let (name, url) = if let Some(caps) = AUTHOR_ANGLE.captures(value) {
        (caps[1].trim().to_string(), Some(caps[2].trim().to_string()))
    } else {
        match value.rsplit_once(char::is_whitespace) {
            Some((name, url)) if url.starts_with("http://") || url.starts_with("https://") => {
                (name.trim().to_string(), Some(url.to_string()))
            }
            _ => (value.to_string(), None),
        }
    };

    let social = |re: &Regex| {
        url.as_deref()
            .and_then(|u| re.captures(u))
            .map(|c| c[1].to_string())
    };

    Author {
        github: social(&GITHUB),
        twitter: social(&TWITTER),
        youtube: social(&YOUTUBE),
        name,
        url,
    }
}

fn file_stem(file: &str) -> &str {
    file.strip_suffix(".ts").unwrap_or(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_block() {
        let src = r#"/**
 * @name Greet
 * @description Says hello
 * @author Ada Lovelace <https://github.com/ada>
 * @uses clipboard, notifications,
 * @shortcut Ctrl+Alt+G
 * @schedule 0 9 * * *
 * @hide
 */
console.log("hi")
"#;
        let info = parse_script_info("greet.ts", src);
        assert_eq!(info.file, "greet.ts");
        assert_eq!(info.name, "Greet");
        assert_eq!(info.description.as_deref(), Some("Says hello"));
        assert_eq!(info.uses, vec!["clipboard", "notifications"]);
        assert_eq!(info.shortcut.as_deref(), Some("Ctrl+Alt+G"));
        assert_eq!(info.schedule.as_deref(), Some("0 9 * * *"));
        assert!(info.hidden);

        let author = info.author.unwrap();
        assert_eq!(author.name, "Ada Lovelace");
        assert_eq!(author.github.as_deref(), Some("ada"));
        assert_eq!(author.twitter, None);
    }

    #[test]
    fn test_name_defaults_to_file_stem() {
        let info = parse_script_info("plain.ts", "console.log(1)");
        assert_eq!(info.name, "plain");
        assert!(!info.hidden);
        assert_eq!(info.author, None);
    }

    #[test]
    fn test_first_block_wins() {
        let src = "/** @name First */\n/**\n * @name Second\n * @description Later\n */\n";
        let info = parse_script_info("x.ts", src);
        assert_eq!(info.name, "First");
        assert_eq!(info.description.as_deref(), Some("Later"));
    }

    #[test]
    fn test_line_comments_are_ignored() {
        let src = "// @name Nope\nconst a = 1;";
        assert_eq!(parse_script_info("a.ts", src).name, "a");
    }

    #[test]
    fn test_parse_author_variants() {
        let a = parse_author("Bob https://twitter.com/bobby");
        assert_eq!(a.name, "Bob");
        assert_eq!(a.twitter.as_deref(), Some("bobby"));

        let a = parse_author("Cy <https://www.youtube.com/@cychannel>");
        assert_eq!(a.youtube.as_deref(), Some("cychannel"));

        let a = parse_author("Just A Name");
        assert_eq!(a.name, "Just A Name");
        assert_eq!(a.url, None);
    }
}
