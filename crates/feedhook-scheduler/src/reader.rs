//! Feed reader — fetches an upstream document and extracts its entries.
//! Handles RSS 2.0 and Atom 1.0; entries keep the order the source lists them.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedhook_core::config::FeedhookConfig;
use feedhook_core::error::{FeedhookError, Result};
use regex::Regex;

use crate::template;

/// Accept header sent with every fetch.
const ACCEPT: &str = "application/atom+xml, application/rss+xml, application/xml, text/xml, */*";

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#[0-9]{1,7}|#[xX][0-9A-Fa-f]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});")
        .expect("entity pattern is valid")
});

/// One item parsed out of a feed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    /// Plain-text description.
    pub description: Option<String>,
    /// Plain-text body; falls back to the description.
    pub content: Option<String>,
    /// Publish date exactly as the source wrote it.
    pub pub_date: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub categories: Vec<String>,
}

impl FeedEntry {
    /// Dedup key: the guid, or the link when there is none.
    pub fn dedup_key(&self) -> Option<&str> {
        non_empty(self.guid.as_deref()).or_else(|| non_empty(self.link.as_deref()))
    }

    /// Named fields handed to the template renderer.
    pub fn fields(&self) -> HashMap<&'static str, String> {
        template::FIELDS
            .iter()
            .map(|&name| (name, self.field(name)))
            .collect()
    }

    fn field(&self, name: &str) -> String {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        match name {
            "title" => text(&self.title),
            "link" => text(&self.link),
            "description" => text(&self.description),
            "content" => text(&self.content),
            "pubDate" => text(&self.pub_date),
            "isoDate" => self.published.map(|d| d.to_rfc3339()).unwrap_or_default(),
            "author" => text(&self.author),
            "categories" => self.categories.join(", "),
            _ => String::new(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn non_empty_owned(value: Option<&str>) -> Option<String> {
    non_empty(value).map(String::from)
}

/// Source of feed entries. Implemented over HTTP in production and by
/// in-memory fakes in tests.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>>;
}

/// Fetches feeds over HTTP with a bounded timeout and body size.
pub struct HttpFeedSource {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFeedSource {
    pub fn new(user_agent: &str, timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FeedhookError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, max_bytes })
    }

    pub fn from_config(config: &FeedhookConfig) -> Result<Self> {
        Self::new(
            &config.user_agent,
            Duration::from_secs(config.fetch_timeout_secs),
            config.max_feed_bytes,
        )
    }

    fn too_large(&self, url: &str) -> FeedhookError {
        FeedhookError::Feed(format!("{url} is larger than {} bytes", self.max_bytes))
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
        tracing::debug!("Fetching feed from {url}");
        let mut resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send()
            .await
            .map_err(|e| FeedhookError::Http(format!("Fetch {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FeedhookError::Http(format!("HTTP {status} when fetching {url}")));
        }
        if resp.content_length().is_some_and(|len| len > self.max_bytes as u64) {
            return Err(self.too_large(url));
        }

        // Servers may omit or understate Content-Length, so count as we go.
        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| FeedhookError::Http(format!("Reading {url} failed: {e}")))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        let entries = parse_feed(&body)?;
        tracing::debug!("Parsed {} entries from {url}", entries.len());
        Ok(entries)
    }
}

/// Parse an RSS or Atom document into entries, in document order.
pub fn parse_feed(data: &[u8]) -> Result<Vec<FeedEntry>> {
    let rss_err = match rss::Channel::read_from(Cursor::new(data)) {
        Ok(channel) => return Ok(channel.items().iter().map(entry_from_rss).collect()),
        Err(e) => e,
    };
    match atom_syndication::Feed::read_from(Cursor::new(data)) {
        Ok(feed) => Ok(feed.entries().iter().map(entry_from_atom).collect()),
        Err(atom_err) => Err(FeedhookError::Feed(format!(
            "Not a valid RSS or Atom document (rss: {rss_err}; atom: {atom_err})"
        ))),
    }
}

fn entry_from_rss(item: &rss::Item) -> FeedEntry {
    let description = item.description().map(strip_html).filter(|d| !d.is_empty());
    let content = item
        .content()
        .map(strip_html)
        .filter(|c| !c.is_empty())
        .or_else(|| description.clone());
    let author = non_empty_owned(item.author()).or_else(|| {
        item.dublin_core_ext()
            .map(|dc| dc.creators().join(", "))
            .filter(|c| !c.is_empty())
    });

    FeedEntry {
        guid: non_empty_owned(item.guid().map(|g| g.value())),
        title: non_empty_owned(item.title()),
        link: non_empty_owned(item.link()),
        description,
        content,
        pub_date: non_empty_owned(item.pub_date()),
        published: item.pub_date().and_then(parse_date),
        author,
        categories: item.categories().iter().map(|c| c.name().to_string()).collect(),
    }
}

fn entry_from_atom(entry: &atom_syndication::Entry) -> FeedEntry {
    let link = entry
        .links()
        .iter()
        .find(|l| l.rel() == "alternate")
        .or_else(|| entry.links().first())
        .map(|l| l.href());
    let description = entry
        .summary()
        .map(|s| strip_html(&s.value))
        .filter(|d| !d.is_empty());
    let content = entry
        .content()
        .and_then(|c| c.value())
        .map(strip_html)
        .filter(|c| !c.is_empty())
        .or_else(|| description.clone());
    let date = entry.published().unwrap_or_else(|| entry.updated());
    let authors = entry
        .authors()
        .iter()
        .map(|p| p.name().to_string())
        .collect::<Vec<_>>()
        .join(", ");

    FeedEntry {
        guid: non_empty_owned(Some(entry.id())),
        title: non_empty_owned(Some(&entry.title().value)),
        link: non_empty_owned(link),
        description,
        content,
        pub_date: Some(date.to_rfc3339()),
        published: Some(date.with_timezone(&Utc)),
        author: non_empty_owned(Some(&authors)),
        categories: entry.categories().iter().map(|c| c.term().to_string()).collect(),
    }
}

/// RFC 2822 first (RSS), then RFC 3339 (what many generators emit anyway).
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

/// Reduce an HTML fragment to single-spaced plain text.
pub fn strip_html(html: &str) -> String {
    let text = HTML_TAG.replace_all(html, " ");
    let text = decode_entities(&text);
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Decode named and numeric character references. Unknown ones and stray
/// ampersands are kept as written.
fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            htmlescape::decode_html(&caps[0]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example</title>
    <link>https://example.com</link>
    <description>Example feed</description>
    <item>
      <title>Second post</title>
      <link>https://example.com/2</link>
      <guid>post-2</guid>
      <description>&lt;p&gt;Hello &amp;amp; &lt;b&gt;welcome&lt;/b&gt;&lt;/p&gt;</description>
      <pubDate>Tue, 02 Jan 2024 10:00:00 +0000</pubDate>
      <dc:creator>Ferris</dc:creator>
      <category>rust</category>
      <category>news</category>
    </item>
    <item>
      <title>First post</title>
      <link>https://example.com/1</link>
      <content:encoded><![CDATA[<div>Full <i>body</i></div>]]></content:encoded>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <id>urn:example:feed</id>
  <updated>2024-03-01T12:00:00Z</updated>
  <entry>
    <title>Atom entry</title>
    <id>urn:example:entry:1</id>
    <link rel="alternate" href="https://example.com/atom/1"/>
    <updated>2024-03-01T12:00:00Z</updated>
    <published>2024-02-28T08:30:00+02:00</published>
    <summary>Short summary</summary>
    <author><name>Alice</name></author>
    <category term="updates"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_keeps_document_order() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title.as_deref(), Some("Second post"));
        assert_eq!(entries[1].title.as_deref(), Some("First post"));
    }

    #[test]
    fn test_parse_rss_fields() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        let e = &entries[0];
        assert_eq!(e.guid.as_deref(), Some("post-2"));
        assert_eq!(e.description.as_deref(), Some("Hello & welcome"));
        assert_eq!(e.content, e.description);
        assert_eq!(e.author.as_deref(), Some("Ferris"));
        assert_eq!(e.categories, vec!["rust".to_string(), "news".to_string()]);
        assert_eq!(
            e.published,
            Some(DateTime::parse_from_rfc3339("2024-01-02T10:00:00Z").unwrap().with_timezone(&Utc))
        );
    }

    #[test]
    fn test_rss_without_guid_falls_back_to_link() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        let e = &entries[1];
        assert!(e.guid.is_none());
        assert!(e.published.is_none());
        assert_eq!(e.dedup_key(), Some("https://example.com/1"));
        assert_eq!(e.content.as_deref(), Some("Full body"));
    }

    #[test]
    fn test_parse_atom() {
        let entries = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.guid.as_deref(), Some("urn:example:entry:1"));
        assert_eq!(e.link.as_deref(), Some("https://example.com/atom/1"));
        assert_eq!(e.author.as_deref(), Some("Alice"));
        assert_eq!(e.content.as_deref(), Some("Short summary"));
        assert_eq!(
            e.published,
            Some(DateTime::parse_from_rfc3339("2024-02-28T06:30:00Z").unwrap().with_timezone(&Utc))
        );
    }

    #[test]
    fn test_parse_garbage_is_feed_error() {
        let err = parse_feed(b"<html><body>not a feed</body></html>").unwrap_err();
        assert!(matches!(err, FeedhookError::Feed(_)));
    }

    #[test]
    fn test_fields_for_template() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        let fields = entries[0].fields();
        assert_eq!(fields.len(), template::FIELDS.len());
        assert_eq!(fields["title"], "Second post");
        assert_eq!(fields["categories"], "rust, news");
        assert_eq!(fields["pubDate"], "Tue, 02 Jan 2024 10:00:00 +0000");
        assert_eq!(fields["isoDate"], "2024-01-02T10:00:00+00:00");
        assert_eq!(fields["link"], "https://example.com/2");
    }

    #[test]
    fn test_dedup_key_missing() {
        let entry = FeedEntry {
            title: Some("No key".into()),
            guid: Some("   ".into()),
            ..Default::default()
        };
        assert!(entry.dedup_key().is_none());
    }

    /// Answer one HTTP request with `response` verbatim, then close.
    async fn serve_once(response: Vec<u8>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/feed.xml")
    }

    fn source(max_bytes: usize) -> HttpFeedSource {
        HttpFeedSource::new("feedhook-test", Duration::from_secs(5), max_bytes).unwrap()
    }

    #[tokio::test]
    async fn test_http_fetch_parses_body() {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/rss+xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            RSS.len()
        )
        .into_bytes();
        response.extend_from_slice(RSS.as_bytes());
        let url = serve_once(response).await;

        let entries = source(64 * 1024).fetch(&url).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_http_fetch_rejects_declared_oversize_body() {
        let mut response =
            b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n".to_vec();
        response.extend(std::iter::repeat_n(b'x', 4096));
        let url = serve_once(response).await;

        let err = source(1024).fetch(&url).await.unwrap_err();
        assert!(matches!(err, FeedhookError::Feed(ref m) if m.contains("larger than 1024 bytes")));
    }

    #[tokio::test]
    async fn test_http_fetch_caps_undeclared_body() {
        // No Content-Length: the body runs until the connection closes.
        let mut response = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_vec();
        response.extend(std::iter::repeat_n(b'x', 4096));
        let url = serve_once(response).await;

        let err = source(1024).fetch(&url).await.unwrap_err();
        assert!(matches!(err, FeedhookError::Feed(_)));
    }

    #[tokio::test]
    async fn test_http_fetch_error_status() {
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await;
        let err = source(1024).fetch(&url).await.unwrap_err();
        assert!(matches!(err, FeedhookError::Http(ref m) if m.contains("404")));
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>a&nbsp;<b>b</b></p>\n\n c"), "a b c");
    }

    #[test]
    fn test_strip_html_decodes_entities() {
        assert_eq!(
            strip_html("<p>It&#8217;s caf&eacute; &mdash; &#x2014; done</p>"),
            "It\u{2019}s caf\u{e9} \u{2014} \u{2014} done"
        );
        assert_eq!(strip_html("AT&amp;T &lt;3"), "AT&T <3");
    }

    #[test]
    fn test_strip_html_keeps_unknown_references() {
        assert_eq!(strip_html("Q&A &bogus; 5 & 6"), "Q&A &bogus; 5 & 6");
    }
}
