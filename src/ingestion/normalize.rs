//! Plain-text and markdown normalization.

use regex::Regex;
use std::sync::OnceLock;

struct MarkdownRules {
    code_block: Regex,
    image: Regex,
    link: Regex,
    header: Regex,
    emphasis_star: Regex,
    emphasis_underscore: Regex,
    inline_code: Regex,
    blockquote: Regex,
    rule: Regex,
    bullet: Regex,
    numbered: Regex,
}

fn markdown_rules() -> &'static MarkdownRules {
    static RULES: OnceLock<MarkdownRules> = OnceLock::new();
    RULES.get_or_init(|| MarkdownRules {
        code_block: Regex::new(r"```[\s\S]*?```").expect("Invalid regex"),
        image: Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("Invalid regex"),
        link: Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("Invalid regex"),
        header: Regex::new(r"(?m)^#{1,6}\s+").expect("Invalid regex"),
        emphasis_star: Regex::new(r"\*{1,3}([^*\n]+)\*{1,3}").expect("Invalid regex"),
        emphasis_underscore: Regex::new(r"\b_{1,3}([^_\n]+)_{1,3}\b").expect("Invalid regex"),
        inline_code: Regex::new(r"`([^`]+)`").expect("Invalid regex"),
        blockquote: Regex::new(r"(?m)^>\s?").expect("Invalid regex"),
        rule: Regex::new(r"(?m)^[-*_]{3,}\s*$").expect("Invalid regex"),
        bullet: Regex::new(r"(?m)^[ \t]*[-*+]\s+").expect("Invalid regex"),
        numbered: Regex::new(r"(?m)^[ \t]*\d+\.\s+").expect("Invalid regex"),
    })
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("Invalid regex"))
}

fn inline_spaces() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("Invalid regex"))
}

/// Decode the HTML entities that commonly leak into pasted blog text.
fn unescape_entities(text: &str) -> String {
    const ENTITIES: &[(&str, &str)] = &[
        ("&nbsp;", " "),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
        ("&apos;", "'"),
        ("&rsquo;", "'"),
        ("&lsquo;", "'"),
        ("&rdquo;", "\""),
        ("&ldquo;", "\""),
        ("&mdash;", "-"),
        ("&ndash;", "-"),
        ("&hellip;", "..."),
        // Last, so that "&amp;lt;" decodes to "&lt;" rather than "<".
        ("&amp;", "&"),
    ];

    let mut out = text.to_string();
    for (entity, replacement) in ENTITIES {
        if out.contains(entity) {
            out = out.replace(entity, replacement);
        }
    }
    out
}

/// Clean raw text: decode entities, collapse spaces, cap blank lines, trim lines.
pub fn normalize_text(text: &str) -> String {
    let text = unescape_entities(&text.replace("\r\n", "\n"));
    let text = inline_spaces().replace_all(&text, " ");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let joined = lines.join("\n");
    blank_runs().replace_all(&joined, "\n\n").trim().to_string()
}

/// Convert markdown to plain text suitable for drafting.
pub fn strip_markdown(markdown: &str) -> String {
    let rules = markdown_rules();

    let text = rules.code_block.replace_all(markdown, "");
    let text = rules.image.replace_all(&text, "");
    let text = rules.link.replace_all(&text, "$1");
    let text = rules.header.replace_all(&text, "");
    let text = rules.emphasis_star.replace_all(&text, "$1");
    let text = rules.emphasis_underscore.replace_all(&text, "$1");
    let text = rules.inline_code.replace_all(&text, "$1");
    let text = rules.blockquote.replace_all(&text, "");
    let text = rules.rule.replace_all(&text, "");
    let text = rules.bullet.replace_all(&text, "");
    let text = rules.numbered.replace_all(&text, "");

    normalize_text(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        let raw = "  Hello \t  world &amp; friends  \r\n\n\n\n\nNext&nbsp;para  ";
        assert_eq!(normalize_text(raw), "Hello world & friends\n\nNext para");
    }

    #[test]
    fn test_strip_markdown() {
        let md = r#"# Why Rust

Rust is **fast** and *safe*. See [the book](https://doc.rust-lang.org/book/).

![logo](logo.png)

```rust
fn main() {}
```

> Fearless concurrency.

---

- Ownership
- Borrowing
1. Lifetimes
Use `cargo` to build."#;

        let text = strip_markdown(md);
        assert!(text.starts_with("Why Rust"));
        assert!(text.contains("Rust is fast and safe. See the book."));
        assert!(!text.contains("logo"));
        assert!(!text.contains("fn main"));
        assert!(text.contains("Fearless concurrency."));
        assert!(text.contains("Ownership\nBorrowing\nLifetimes"));
        assert!(text.contains("Use cargo to build."));
        assert!(!text.contains("---"));
    }

    #[test]
    fn test_snake_case_identifiers_survive() {
        assert_eq!(strip_markdown("call my_func_name now"), "call my_func_name now");
    }
}
