use situational_ingest::ingest::collector::Collector;
use situational_ingest::ingest::normalize::normalize_all;
use situational_ingest::ingest::providers::news_rss::NewsRssCollector;
use situational_ingest::ingest::types::{RawRecord, SourceType};

const NEWS_XML: &str = include_str!("fixtures/news_rss.xml");

fn news_items(v: &[RawRecord]) -> Vec<&situational_ingest::ingest::types::RawNews> {
    v.iter()
        .map(|r| match r {
            RawRecord::News(n) => n,
            other => panic!("non-news record {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn fixture_feed_yields_raw_news_with_channel_as_publisher() {
    let c = NewsRssCollector::from_fixture_str(NEWS_XML);
    assert_eq!(c.source_type(), SourceType::News);

    let raws = c.collect().await.expect("rss parse ok");
    assert_eq!(raws.len(), 3);
    let items = news_items(&raws);
    assert!(items.iter().all(|n| n.source.as_deref() == Some("Lanka News Wire")));
    assert_eq!(
        items[0].published_at.as_deref(),
        Some("Wed, 01 May 2024 08:30:00 +0530")
    );
    assert_eq!(items[1].category.as_deref(), Some("Economy"));
}

#[tokio::test]
async fn feed_items_normalize_and_untitled_item_is_rejected() {
    let raws = NewsRssCollector::from_fixture_str(NEWS_XML)
        .collect()
        .await
        .unwrap();
    let (ok, rejected) = normalize_all(SourceType::News, &raws);
    assert_eq!(ok.len(), 2);
    assert_eq!(rejected.len(), 1);

    let first = &ok[0];
    let content = first.payload["content"].as_str().unwrap();
    assert!(content.starts_with("The Met Department issued an amber alert"));
    assert!(!content.contains('<'));
    assert_eq!(first.payload["category"], "weather");
    assert_eq!(first.observed_at.to_rfc3339(), "2024-05-01T03:00:00+00:00");

    // fragment dropped from the natural key
    assert_eq!(ok[1].external_id.as_deref(), Some("https://newswire.lk/economy/fuel"));
}

#[tokio::test]
async fn explicit_publisher_overrides_channel_title() {
    let raws = NewsRssCollector::from_fixture_str(NEWS_XML)
        .with_publisher("Daily Mirror")
        .collect()
        .await
        .unwrap();
    assert!(news_items(&raws)
        .iter()
        .all(|n| n.source.as_deref() == Some("Daily Mirror")));
}

#[tokio::test]
async fn one_broken_feed_is_skipped_but_all_broken_fails() {
    let mixed = NewsRssCollector::from_fixture_str("<rss><channel><item>")
        .with_fixture(NEWS_XML);
    assert_eq!(mixed.feed_count(), 2);
    assert_eq!(mixed.collect().await.unwrap().len(), 3);

    let broken = NewsRssCollector::from_fixture_str("<rss><channel><item>")
        .with_file("/definitely/not/here.xml");
    let err = broken.collect().await.unwrap_err();
    assert!(format!("{err:#}").contains("all 2 rss feeds failed"));
}

#[tokio::test]
async fn file_feed_is_read_at_collect_time() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("feed.xml");
    let c = NewsRssCollector::from_file(&p);

    // missing at construction is fine; only collect() touches the disk
    std::fs::write(&p, NEWS_XML).unwrap();
    assert_eq!(c.collect().await.unwrap().len(), 3);
}
