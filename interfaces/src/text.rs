use regex::Regex;
use std::sync::LazyLock;

static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // fenced and inline code
        (r"(?s)```.*?```", ""),
        (r"`[^`]*`", ""),
        (r"(?m)^\s*#{1,6}\s*", ""),
        (r"!\[([^\]]*)\]\([^)]*\)", "$1"),
        (r"\[([^\]]*)\]\([^)]*\)", "$1"),
        (r"https?://(www\.)?", ""),
        (r"<[^>]*>", ""),
        (r"(?m)^\s*[-*_]{3,}\s*$", ""),
        (r"\s+", " "),
        (r"[^a-zA-Z0-9\s\-_./:?=&]", ""),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("preprocess patterns are valid"),
            replacement,
        )
    })
    .collect()
});

/// Normalizes text before it is embedded: drops markdown, markup and code,
/// strips url schemes, collapses whitespace and lowercases the result.
pub fn preprocess(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in RULES.iter() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out.trim().to_lowercase()
}
