use crate::types::{IngestError, ParsedFeed, RawCategory, RawItem, Result};
use feed_rs::model::{Content, Entry, FeedType, Text};
use feed_rs::parser;
use tracing::debug;

const HTML: &str = "text/html";

/// Parses an RSS, Atom or JSON feed document.
///
/// Entries without a guid keep an empty id so identity falls back to the
/// link instead of an id synthesised by the parser.
pub fn parse_feed(content: &str) -> Result<ParsedFeed> {
    debug!("Parsing feed content ({} bytes)", content.len());

    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(content.as_bytes())
        .map_err(|e| IngestError::Parse(format!("Failed to parse feed: {e}")))?;

    let is_rss = matches!(
        feed.feed_type,
        FeedType::RSS0 | FeedType::RSS1 | FeedType::RSS2
    );

    let items = feed
        .entries
        .into_iter()
        .map(|entry| convert_entry(entry, is_rss))
        .collect::<Vec<_>>();

    debug!("Parsed feed with {} items", items.len());

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content.trim().to_string()),
        build_date: feed.updated.or(feed.published),
        items,
    })
}

fn convert_entry(entry: Entry, is_rss: bool) -> RawItem {
    let mut item = RawItem {
        title: entry
            .title
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default(),
        link: entry
            .links
            .first()
            .map(|link| link.href.clone())
            .unwrap_or_default(),
        guid: Some(entry.id).filter(|id| !id.trim().is_empty()),
        published_at: entry.published.or(entry.updated),
        categories: entry
            .categories
            .into_iter()
            .map(|category| RawCategory {
                domain: category.scheme,
                label: category.label.unwrap_or(category.term),
            })
            .collect(),
        ..Default::default()
    };

    if let Some(content) = entry.content {
        let html = is_html_content(&content);
        if let Some(body) = content.body {
            if html {
                item.content_encoded = Some(body);
            } else {
                item.content = Some(body);
            }
        }
    }

    // media descriptions stand in for snippets
    if let Some(description) = entry.media.into_iter().find_map(|media| media.description) {
        if is_html_text(&description) {
            item.content_snippet_encoded = Some(description.content);
        } else {
            item.content_snippet = Some(description.content);
        }
    }

    if let Some(summary) = entry.summary {
        if is_rss {
            item.description = Some(summary.content);
        } else {
            item.summary = Some(summary.content);
        }
    }

    item
}

fn is_html_content(content: &Content) -> bool {
    content.content_type.essence_str() == HTML
}

fn is_html_text(text: &Text) -> bool {
    text.content_type.essence_str() == HTML
}
