// src/ingest/providers/news_rss.rs
//! RSS news collector. Emits raw, uncleaned `RawRecord::News` items; cleaning
//! and validation are the normalizer's job.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::ingest::collector::Collector;
use crate::ingest::types::{RawNews, RawRecord, SourceType};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    category: Option<String>,
}

enum Feed {
    Fixture(String),
    File(PathBuf),
    #[cfg(feature = "ingest-http")]
    Http { url: String },
}

impl Feed {
    fn label(&self) -> String {
        match self {
            Feed::Fixture(_) => "inline".to_string(),
            Feed::File(p) => p.display().to_string(),
            #[cfg(feature = "ingest-http")]
            Feed::Http { url } => url.clone(),
        }
    }
}

/// One collector over any number of feeds. A feed that fails is logged and
/// skipped; the collection only fails when every feed does.
pub struct NewsRssCollector {
    publisher: Option<String>,
    feeds: Vec<Feed>,
    #[cfg(feature = "ingest-http")]
    client: reqwest::Client,
}

impl NewsRssCollector {
    /// Collector with no feeds; add them with the `with_*` builders.
    pub fn empty() -> Self {
        Self {
            publisher: None,
            feeds: Vec::new(),
            #[cfg(feature = "ingest-http")]
            client: reqwest::Client::new(),
        }
    }

    pub fn from_fixture_str(xml: &str) -> Self {
        Self::empty().with_fixture(xml)
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::empty().with_file(path)
    }

    #[cfg(feature = "ingest-http")]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::empty().with_url(url)
    }

    pub fn with_fixture(mut self, xml: &str) -> Self {
        self.feeds.push(Feed::Fixture(xml.to_string()));
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.feeds.push(Feed::File(path.into()));
        self
    }

    #[cfg(feature = "ingest-http")]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.feeds.push(Feed::Http { url: url.into() });
        self
    }

    /// Publisher name stamped on items; defaults to the channel title.
    pub fn with_publisher(mut self, name: impl Into<String>) -> Self {
        self.publisher = Some(name.into());
        self
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<RawRecord>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).context("parsing news rss xml")?;

        let publisher = self.publisher.clone().or(rss.channel.title);
        let out: Vec<RawRecord> = rss
            .channel
            .item
            .into_iter()
            .map(|it| {
                RawRecord::News(RawNews {
                    title: it.title,
                    content: it.description,
                    source: publisher.clone(),
                    url: it.link,
                    published_at: it.pub_date,
                    category: it.category,
                    location: None,
                })
            })
            .collect();

        histogram!("ingest_rss_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }

    async fn read_feed(&self, feed: &Feed) -> Result<Vec<RawRecord>> {
        match feed {
            Feed::Fixture(s) => self.parse_items_from_str(s),
            Feed::File(p) => {
                let body = tokio::fs::read_to_string(p)
                    .await
                    .with_context(|| format!("reading rss file {}", p.display()))?;
                self.parse_items_from_str(&body)
            }
            #[cfg(feature = "ingest-http")]
            Feed::Http { url } => {
                let body = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .context("news rss http get()")?
                    .text()
                    .await
                    .context("news rss http .text()")?;
                self.parse_items_from_str(&body)
            }
        }
    }
}

#[async_trait]
impl Collector for NewsRssCollector {
    fn source_type(&self) -> SourceType {
        SourceType::News
    }

    fn name(&self) -> &str {
        "news_rss"
    }

    async fn collect(&self) -> Result<Vec<RawRecord>> {
        let mut out = Vec::new();
        let mut failures = 0usize;
        let mut last_err = None;

        for feed in &self.feeds {
            match self.read_feed(feed).await {
                Ok(mut v) => out.append(&mut v),
                Err(e) => {
                    tracing::warn!(target: "ingest", error = ?e, feed = %feed.label(), "rss feed error");
                    failures += 1;
                    last_err = Some(e);
                }
            }
        }

        if failures > 0 && failures == self.feeds.len() {
            return Err(last_err.unwrap_or_else(|| anyhow!("all rss feeds failed")))
                .context(format!("all {failures} rss feeds failed"));
        }
        Ok(out)
    }
}

/// quick-xml knows only the XML entities; map the common HTML ones first.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
