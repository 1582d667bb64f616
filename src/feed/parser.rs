use chrono::{DateTime, Utc};
use feed_rs::parser;

/// A fetched feed reduced to the fields the pipeline consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    /// Feed-level image (RSS channel image / Atom logo, falling back to icon)
    pub image: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

/// One entry of a parsed feed. Every field is optional at this stage;
/// the worker decides what qualifies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEntry {
    pub title: Option<String>,
    pub description: Option<String>,
    pub categories: Vec<String>,
    pub link: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
}

/// Parse RSS, Atom or JSON Feed bytes.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let image = feed
        .logo
        .map(|img| img.uri)
        .or_else(|| feed.icon.map(|img| img.uri))
        .filter(|uri| !uri.is_empty());

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| ParsedEntry {
            title: entry.title.map(|t| t.content),
            description: entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body)),
            categories: entry.categories.into_iter().map(|c| c.term).collect(),
            link: entry.links.first().map(|l| l.href.clone()),
            updated: entry.updated,
            published: entry.published,
        })
        .collect();

    Ok(ParsedFeed { image, entries })
}
