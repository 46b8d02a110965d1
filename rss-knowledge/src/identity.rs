//! Stable identities and fragment construction for feed items.

use crate::types::RawItem;
use uuid::Uuid;

/// Category domain marking a free-form tag.
pub const TAG_DOMAIN: &str = "tag";

pub fn source_id(url: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
}

/// A guid that already is a canonical hyphenated UUID is used as-is; anything
/// else is hashed into one. Items without a guid are keyed by their link.
///
/// UUID guids compare case-insensitively and come back in the lowercase
/// hyphenated form, so `6F1B...` and `6f1b...` name the same article.
pub fn article_id(item: &RawItem) -> Uuid {
    if let Some(guid) = item.guid.as_deref() {
        if let Some(id) = parse_canonical_uuid(guid) {
            return id;
        }
        return Uuid::new_v5(&Uuid::NAMESPACE_URL, guid.as_bytes());
    }

    let key = if item.link.is_empty() {
        &item.title
    } else {
        &item.link
    };
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

fn parse_canonical_uuid(value: &str) -> Option<Uuid> {
    if value.len() != 36 {
        return None;
    }
    Uuid::parse_str(value).ok()
}

/// First non-empty body in priority order.
pub fn resolve_body(item: &RawItem) -> Option<&str> {
    [
        &item.content_encoded,
        &item.content,
        &item.content_snippet_encoded,
        &item.content_snippet,
        &item.summary,
        &item.description,
    ]
    .into_iter()
    .filter_map(|field| field.as_deref())
    .find(|body| !body.trim().is_empty())
}

pub fn display_text(title: &str, converted: &str) -> String {
    format!("**{}**: {}", title, join_lines(converted))
}

/// Paragraphs of the converted body, each prefixed with the item title.
pub fn body_fragments(title: &str, converted: &str) -> Vec<String> {
    split_paragraphs(converted)
        .into_iter()
        .map(|paragraph| format!("{title} {paragraph}"))
        .collect()
}

/// Paragraphs are separated by two or more newlines; single newlines inside a
/// paragraph become spaces.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut newlines = 0;

    // Walk line by line so runs of `\n` of any length act as one separator.
    for line in text.split('\n') {
        if line.is_empty() {
            newlines += 1;
            continue;
        }
        if newlines >= 1 && !current.is_empty() {
            paragraphs.push(current.join(" "));
            current.clear();
        }
        newlines = 0;
        current.push(line);
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

pub fn category_fragments(item: &RawItem) -> Vec<String> {
    item.categories
        .iter()
        .filter(|category| category.domain.as_deref() == Some(TAG_DOMAIN))
        .map(|category| category.label.trim())
        .filter(|label| !label.is_empty())
        .map(|tag| {
            format!(
                "Why is {tag} up or down? What's going on with {tag}? \
                 What's the latest news on {tag}?"
            )
        })
        .collect()
}

fn join_lines(text: &str) -> String {
    text.split('\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}
