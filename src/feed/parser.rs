use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser::{self, ParseFeedError};

use crate::util::strip_control_chars;

/// One entry as it appeared in the feed document, before normalization.
///
/// Text fields default to empty strings when the document omits them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub summary: String,
    pub author: String,
    pub image_url: Option<String>,
}

/// Parses an RSS, Atom or JSON Feed document into its entries, in document
/// order.
///
/// Missing optional fields never fail the parse; only a document that is not
/// a recognisable feed at all is an error.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<RawEntry>, ParseFeedError> {
    let feed = parser::parse(bytes)?;
    Ok(feed.entries.into_iter().map(into_raw_entry).collect())
}

fn into_raw_entry(entry: Entry) -> RawEntry {
    let image_url = image_url(&entry);

    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .unwrap_or_default();

    let title = entry.title.map(|t| t.content).unwrap_or_default();

    let author = entry
        .authors
        .first()
        .map(|p| p.name.clone())
        .unwrap_or_default();

    RawEntry {
        title: clean(&title),
        link,
        published: entry.published,
        updated: entry.updated,
        summary: clean(&summary),
        author: clean(&author),
        image_url,
    }
}

fn clean(s: &str) -> String {
    strip_control_chars(s.trim()).into_owned()
}

/// Picks a representative image: `media:thumbnail` first, then image-typed
/// `media:content` (which also carries RSS image enclosures), then an
/// image-typed enclosure link.
fn image_url(entry: &Entry) -> Option<String> {
    let thumbnail = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .find(|uri| !uri.is_empty());
    if thumbnail.is_some() {
        return thumbnail;
    }

    let media_content = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find(|c| {
            c.content_type
                .as_ref()
                .is_some_and(|ct| ct.ty() == "image")
        })
        .and_then(|c| c.url.as_ref().map(|u| u.to_string()));
    if media_content.is_some() {
        return media_content;
    }

    entry
        .links
        .iter()
        .find(|l| {
            l.rel.as_deref() == Some("enclosure")
                && l.media_type
                    .as_deref()
                    .is_some_and(|t| t.starts_with("image/"))
        })
        .map(|l| l.href.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
<channel>
    <title>Example</title>
    <item>
        <title>  First post  </title>
        <link>https://example.com/1</link>
        <description>Hello world</description>
        <author>alice@example.com (Alice)</author>
        <pubDate>Tue, 02 Jan 2024 10:00:00 +0200</pubDate>
        <media:thumbnail url="https://example.com/thumb.jpg" />
    </item>
    <item>
        <link>https://example.com/2</link>
    </item>
</channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom Example</title>
    <id>urn:example</id>
    <updated>2024-02-01T00:00:00Z</updated>
    <entry>
        <title>Atom entry</title>
        <id>urn:entry:1</id>
        <link rel="enclosure" type="image/png" href="https://example.com/pic.png"/>
        <link rel="alternate" href="https://example.com/atom/1"/>
        <updated>2024-02-01T12:30:00Z</updated>
        <author><name>Bob</name></author>
        <content type="html">&lt;p&gt;Body&lt;/p&gt;</content>
    </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_entries_in_order() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.title, "First post");
        assert_eq!(first.link, "https://example.com/1");
        assert_eq!(first.summary, "Hello world");
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap())
        );
        assert_eq!(first.image_url.as_deref(), Some("https://example.com/thumb.jpg"));
        assert!(!first.author.is_empty());
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        let bare = &entries[1];
        assert_eq!(bare.title, "");
        assert_eq!(bare.summary, "");
        assert_eq!(bare.author, "");
        assert_eq!(bare.published, None);
        assert_eq!(bare.image_url, None);
        assert_eq!(bare.link, "https://example.com/2");
    }

    #[test]
    fn test_parse_atom_uses_alternate_link_and_content() {
        let entries = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.link, "https://example.com/atom/1");
        assert_eq!(entry.author, "Bob");
        assert_eq!(entry.summary, "<p>Body</p>");
        assert_eq!(entry.published, None);
        assert_eq!(
            entry.updated,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 12, 30, 0).unwrap())
        );
        assert_eq!(entry.image_url.as_deref(), Some("https://example.com/pic.png"));
    }

    #[test]
    fn test_media_content_image_used_without_thumbnail() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
<channel>
    <title>Media</title>
    <item>
        <title>Clip and still</title>
        <link>https://example.com/m</link>
        <media:content url="https://example.com/clip.mp4" type="video/mp4" medium="video"/>
        <media:content url="https://example.com/m.jpg" type="image/jpeg" medium="image"/>
    </item>
</channel>
</rss>"#;
        let entries = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].image_url.as_deref(), Some("https://example.com/m.jpg"));
    }

    #[test]
    fn test_invalid_document_is_error() {
        assert!(parse_feed(b"<not valid xml").is_err());
        assert!(parse_feed(b"").is_err());
    }

    #[test]
    fn test_empty_channel_is_ok() {
        let empty = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        assert!(parse_feed(empty.as_bytes()).unwrap().is_empty());
    }
}
