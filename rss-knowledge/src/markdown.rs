//! HTML item bodies to plain text.
//!
//! `html2md` does the conversion. Before it runs, hidden elements and images
//! are cut and anchors are unwrapped to their text. Afterwards the markdown
//! is normalized so paragraph structure survives for fragmentation.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PREFORMATTED: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<pre\b.*?</pre\s*>"));

static HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    pattern(concat!(
        r"(?is)<!--.*?-->",
        r"|<(script|style|head|noscript|template|svg|iframe|picture)\b[^>]*>.*?",
        r"</(script|style|head|noscript|template|svg|iframe|picture)\s*>",
    ))
});

// <img>, <source>, anchors and stray halves of the hidden elements
static DROPPED_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(concat!(
        r"(?i)</?(?:img|source|a|iframe|picture)\b",
        r#"(?:[^>"']|"[^"]*"|'[^']*')*>"#,
    ))
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| pattern(r"\s+"));

static THEMATIC_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^(?:(?:\*\s*){3,}|(?:-\s*){3,}|(?:_\s*){3,}|={3,})$")
});

static STAR_BULLET: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[*+]\s+"));

// a bullet whose text was pushed onto a later line by a nested block
static LONE_BULLET: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^(-|\d+\.)\n+(\S)"));

static STRONG: LazyLock<Regex> = LazyLock::new(|| pattern(r"\*\*([^*\n]*)\*\*"));

static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| pattern(r"(^|[^*\\])\*([^*\n]+)\*([^*]|$)"));

static ESCAPED: LazyLock<Regex> = LazyLock::new(|| pattern(r"\\([\\`*_{}\[\]()#+\-.!<>~|=])"));

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("markdown patterns are valid")
}

pub fn html_to_text(html: &str) -> String {
    let cleaned = HIDDEN.replace_all(html, "");
    let cleaned = DROPPED_TAGS.replace_all(&cleaned, "");
    let cleaned = collapse_whitespace(&cleaned);
    normalize(&html2md::parse_html(&cleaned))
}

/// Whitespace outside `<pre>` is insignificant in HTML, so runs of it
/// become one space before conversion.
fn collapse_whitespace(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for pre in PREFORMATTED.find_iter(html) {
        let text = &html[last..pre.start()];
        out.push_str(&WHITESPACE.replace_all(text, " "));
        out.push_str(pre.as_str());
        last = pre.end();
    }
    out.push_str(&WHITESPACE.replace_all(&html[last..], " "));
    out
}

fn normalize(markdown: &str) -> String {
    let lines = markdown
        .lines()
        .map(str::trim)
        .filter(|line| !THEMATIC_BREAK.is_match(line))
        .collect::<Vec<_>>()
        .join("\n");

    let text = STAR_BULLET.replace_all(&lines, "- ");
    let text = LONE_BULLET.replace_all(&text, "$1 $2");
    let text = STRONG.replace_all(&text, |caps: &Captures| outside_marker(&caps[1], "**"));
    let text = EMPHASIS.replace_all(&text, |caps: &Captures| {
        format!("{}{}{}", &caps[1], outside_marker(&caps[2], "*"), &caps[3])
    });
    let mut text = ESCAPED.replace_all(&text, "$1").into_owned();

    while text.contains("\n\n\n") {
        text = text.replace("\n\n\n", "\n\n");
    }
    text.trim().to_string()
}

/// Moves whitespace at the edges of an emphasized run outside the markers,
/// so `**Breaking **news` reads `**Breaking** news`.
fn outside_marker(inner: &str, marker: &str) -> String {
    if inner.is_empty() {
        return String::new();
    }
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return " ".to_string();
    }
    let lead = &inner[..inner.len() - inner.trim_start().len()];
    let trail = &inner[inner.trim_end().len()..];
    format!("{lead}{marker}{trimmed}{marker}{trail}")
}
