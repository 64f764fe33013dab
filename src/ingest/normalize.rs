// src/ingest/normalize.rs
//! Record normalizer: maps each source's raw shape onto [`IngestRecord`].
//!
//! Pure and deterministic. Optional fields fall back to documented defaults
//! (`"unknown"` locations, `None` numbers); a record is only rejected when it
//! lacks the minimum needed to be meaningful (its natural key or timestamp).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::NormalizationError;
use crate::ingest::clean::{
    clean_opt, clean_text, normalize_location, parse_opt_number, parse_period_start,
    parse_timestamp, parse_unix_seconds,
};
use crate::ingest::types::{
    Fingerprint, IngestRecord, RawNews, RawPrice, RawRecord, RawTax, RawTrend, RawVideo,
    RawWeather, SourceType,
};

type Payload = serde_json::Map<String, serde_json::Value>;

/// Deterministic fingerprint over the source type and natural key, or the
/// normalized payload when the record has no natural key.
pub fn fingerprint(source: SourceType, external_id: Option<&str>, payload: &Payload) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(source.as_str().as_bytes());
    hasher.update(b"|");
    match external_id {
        Some(id) => {
            hasher.update(b"id:");
            hasher.update(id.as_bytes());
        }
        None => {
            // serde_json::Map is ordered by key, so this is canonical.
            hasher.update(b"payload:");
            hasher.update(serde_json::Value::Object(payload.clone()).to_string().as_bytes());
        }
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut hex, "{:02x}", b);
    }
    Fingerprint::from_hex(hex)
}

/// Normalize one raw record produced by the collector for `source`.
pub fn normalize(source: SourceType, raw: &RawRecord) -> Result<IngestRecord, NormalizationError> {
    if raw.source_type() != source {
        return Err(NormalizationError::SourceMismatch {
            expected: source,
            found: raw.source_type(),
        });
    }
    let draft = match raw {
        RawRecord::News(r) => news(r)?,
        RawRecord::Weather(r) => weather(r)?,
        RawRecord::Youtube(r) => video(r)?,
        RawRecord::Trends(r) => trend(r)?,
        RawRecord::Pricing(r) => price(r)?,
        RawRecord::Tax(r) => tax(r)?,
    };
    Ok(draft.into_record(source))
}

/// Normalize a whole collector output, keeping failures apart.
pub fn normalize_all(
    source: SourceType,
    raws: &[RawRecord],
) -> (Vec<IngestRecord>, Vec<NormalizationError>) {
    let mut ok = Vec::with_capacity(raws.len());
    let mut failed = Vec::new();
    for raw in raws {
        match normalize(source, raw) {
            Ok(rec) => ok.push(rec),
            Err(e) => failed.push(e),
        }
    }
    (ok, failed)
}

struct Draft {
    external_id: Option<String>,
    observed_at: DateTime<Utc>,
    payload: Payload,
}

impl Draft {
    fn new<P: Serialize>(
        external_id: Option<String>,
        observed_at: DateTime<Utc>,
        payload: &P,
    ) -> Result<Self, NormalizationError> {
        let payload = match serde_json::to_value(payload) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => Payload::new(),
            Err(e) => return Err(NormalizationError::Payload(e.to_string())),
        };
        Ok(Self {
            external_id,
            observed_at,
            payload,
        })
    }

    fn into_record(self, source: SourceType) -> IngestRecord {
        let content_fingerprint = fingerprint(source, self.external_id.as_deref(), &self.payload);
        IngestRecord {
            source_type: source,
            external_id: self.external_id,
            observed_at: self.observed_at,
            payload: self.payload,
            content_fingerprint,
            batch_id: None,
            ingested_at: None,
        }
    }
}

fn require_text(
    source: SourceType,
    field: &'static str,
    v: Option<&str>,
) -> Result<String, NormalizationError> {
    clean_opt(v).ok_or(NormalizationError::MissingField { source_type: source, field })
}

fn require_time(
    source: SourceType,
    field: &'static str,
    v: Option<&str>,
) -> Result<DateTime<Utc>, NormalizationError> {
    v.and_then(parse_timestamp)
        .ok_or(NormalizationError::MissingTimestamp { source_type: source, field })
}

fn minute_key(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
        .get(..16)
        .unwrap_or_default()
        .to_string()
}

fn day_key(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// Lower-cased scheme/host, no fragment, no trailing slash.
fn canonical_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let no_frag = url.split('#').next().unwrap_or(url);
    let (scheme, rest) = match no_frag.split_once("://") {
        Some((s, r)) => (s.to_ascii_lowercase(), r),
        None => (String::from("https"), no_frag),
    };
    let (host, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let host = host.to_ascii_lowercase();
    let path = path.trim_end_matches('/');
    Some(format!("{scheme}://{host}{path}"))
}

#[derive(Serialize)]
struct NewsPayload {
    title: String,
    content: String,
    source: String,
    url: Option<String>,
    category: String,
    location: String,
}

fn news(r: &RawNews) -> Result<Draft, NormalizationError> {
    let src = SourceType::News;
    let title = require_text(src, "title", r.title.as_deref())?;
    let observed_at = require_time(src, "published_at", r.published_at.as_deref())?;
    let url = r.url.as_deref().and_then(canonical_url);
    let payload = NewsPayload {
        title,
        content: r.content.as_deref().map(clean_text).unwrap_or_default(),
        source: clean_opt(r.source.as_deref()).unwrap_or_else(|| "unknown".into()),
        url: url.clone(),
        category: clean_opt(r.category.as_deref())
            .map(|c| c.to_lowercase())
            .unwrap_or_else(|| "general".into()),
        location: normalize_location(r.location.as_deref()),
    };
    Draft::new(url, observed_at, &payload)
}

#[derive(Serialize)]
struct WeatherPayload {
    location: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    temperature: Option<f64>,
    humidity: Option<f64>,
    rainfall: Option<f64>,
    wind_speed: Option<f64>,
    condition: Option<String>,
}

fn weather(r: &RawWeather) -> Result<Draft, NormalizationError> {
    let src = SourceType::Weather;
    let observed_at = r
        .observed_at
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| r.dt.and_then(parse_unix_seconds))
        .ok_or(NormalizationError::MissingTimestamp {
            source_type: src,
            field: "observed_at",
        })?;
    let location = normalize_location(r.location.as_deref().or(r.city_name.as_deref()));
    let payload = WeatherPayload {
        location: location.clone(),
        latitude: r.latitude.filter(|v| v.is_finite()),
        longitude: r.longitude.filter(|v| v.is_finite()),
        temperature: parse_opt_number(r.temperature.as_ref()),
        humidity: parse_opt_number(r.humidity.as_ref()),
        rainfall: parse_opt_number(r.rainfall.as_ref()),
        wind_speed: parse_opt_number(r.wind_speed.as_ref()),
        condition: clean_opt(r.condition.as_deref()).map(|c| c.to_lowercase()),
    };
    // Readings without a known place have no natural key.
    let external_id =
        (location != "unknown").then(|| format!("{}@{}", location.to_lowercase(), minute_key(&observed_at)));
    Draft::new(external_id, observed_at, &payload)
}

#[derive(Serialize)]
struct VideoPayload {
    video_id: String,
    title: String,
    description: String,
    channel_id: Option<String>,
    channel_title: Option<String>,
    view_count: Option<f64>,
    like_count: Option<f64>,
    comment_count: Option<f64>,
    tags: Vec<String>,
}

fn video(r: &RawVideo) -> Result<Draft, NormalizationError> {
    let src = SourceType::Youtube;
    let video_id = r
        .video_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(NormalizationError::MissingField {
            source_type: src,
            field: "video_id",
        })?;
    let observed_at = require_time(src, "published_at", r.published_at.as_deref())?;
    let payload = VideoPayload {
        video_id: video_id.clone(),
        title: r.title.as_deref().map(clean_text).unwrap_or_default(),
        description: r.description.as_deref().map(clean_text).unwrap_or_default(),
        channel_id: r.channel_id.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
        channel_title: clean_opt(r.channel_title.as_deref()),
        view_count: parse_opt_number(r.view_count.as_ref()),
        like_count: parse_opt_number(r.like_count.as_ref()),
        comment_count: parse_opt_number(r.comment_count.as_ref()),
        tags: r.tags.iter().filter_map(|t| clean_opt(Some(t))).collect(),
    };
    Draft::new(Some(video_id), observed_at, &payload)
}

#[derive(Serialize)]
struct TrendPayload {
    keyword: String,
    geo: String,
    value: Option<f64>,
}

fn trend(r: &RawTrend) -> Result<Draft, NormalizationError> {
    let src = SourceType::Trends;
    let keyword = require_text(src, "keyword", r.keyword.as_deref())?;
    let observed_at = require_time(src, "timestamp", r.timestamp.as_deref())?;
    let geo = clean_opt(r.geo.as_deref())
        .map(|g| g.to_ascii_uppercase())
        .unwrap_or_else(|| "LK".into());
    let external_id = format!(
        "{}|{}|{}",
        keyword.to_lowercase(),
        geo,
        observed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let payload = TrendPayload {
        keyword,
        geo,
        value: parse_opt_number(r.value.as_ref()),
    };
    Draft::new(Some(external_id), observed_at, &payload)
}

#[derive(Serialize)]
struct PricePayload {
    item: String,
    market: String,
    location: String,
    price: Option<f64>,
    unit: Option<String>,
    currency: String,
}

fn price(r: &RawPrice) -> Result<Draft, NormalizationError> {
    let src = SourceType::Pricing;
    let item = require_text(src, "item", r.item.as_deref())?;
    let observed_at = require_time(src, "date", r.date.as_deref())?;
    let market = clean_opt(r.market.as_deref()).unwrap_or_else(|| "unknown".into());
    let external_id = format!(
        "{}|{}|{}",
        market.to_lowercase(),
        item.to_lowercase(),
        day_key(&observed_at)
    );
    let payload = PricePayload {
        item,
        market,
        location: normalize_location(r.location.as_deref()),
        price: parse_opt_number(r.price.as_ref()),
        unit: clean_opt(r.unit.as_deref()).map(|u| u.to_lowercase()),
        currency: clean_opt(r.currency.as_deref())
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| "LKR".into()),
    };
    Draft::new(Some(external_id), observed_at, &payload)
}

#[derive(Serialize)]
struct TaxPayload {
    period: String,
    period_type: String,
    total_revenue: Option<f64>,
    currency: String,
    source: String,
}

fn tax(r: &RawTax) -> Result<Draft, NormalizationError> {
    let src = SourceType::Tax;
    let period = r
        .period
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(NormalizationError::MissingField {
            source_type: src,
            field: "period",
        })?;
    let observed_at = parse_period_start(period).ok_or(NormalizationError::MissingTimestamp {
        source_type: src,
        field: "period",
    })?;
    let period = period.to_ascii_uppercase();
    let period_type = clean_opt(r.period_type.as_deref())
        .map(|p| p.to_lowercase())
        .unwrap_or_else(|| infer_period_type(&period).into());
    let source = clean_opt(r.source.as_deref()).unwrap_or_else(|| "unknown".into());
    let external_id = format!("{}|{}|{}", source.to_lowercase(), period_type, period);
    let payload = TaxPayload {
        period,
        period_type,
        total_revenue: parse_opt_number(r.total_revenue.as_ref()),
        currency: clean_opt(r.currency.as_deref())
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| "LKR".into()),
        source,
    };
    Draft::new(Some(external_id), observed_at, &payload)
}

fn infer_period_type(period: &str) -> &'static str {
    if period.contains('Q') {
        "quarterly"
    } else if period.len() > 4 {
        "monthly"
    } else {
        "annual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::NumberLike;

    fn news_item(title: Option<&str>, url: Option<&str>) -> RawRecord {
        RawRecord::News(RawNews {
            title: title.map(Into::into),
            content: Some("<p>Body</p>".into()),
            source: Some("Daily Mirror".into()),
            url: url.map(Into::into),
            published_at: Some("2024-05-01T08:00:00Z".into()),
            category: None,
            location: None,
        })
    }

    #[test]
    fn fingerprint_is_stable_across_calls() {
        let raw = news_item(Some("Fuel prices up"), Some("https://News.lk/a/1/"));
        let a = normalize(SourceType::News, &raw).unwrap();
        let b = normalize(SourceType::News, &raw).unwrap();
        assert_eq!(a.content_fingerprint, b.content_fingerprint);
        assert_eq!(a.external_id.as_deref(), Some("https://news.lk/a/1"));
        assert_eq!(a.payload["location"], "unknown");
        assert_eq!(a.payload["category"], "general");
    }

    #[test]
    fn url_variants_share_a_fingerprint() {
        let a = normalize(SourceType::News, &news_item(Some("A"), Some("https://news.lk/x#top"))).unwrap();
        let b = normalize(SourceType::News, &news_item(Some("A (updated)"), Some("HTTPS://NEWS.LK/x/"))).unwrap();
        assert_eq!(a.content_fingerprint, b.content_fingerprint);
    }

    #[test]
    fn news_without_url_hashes_payload() {
        let a = normalize(SourceType::News, &news_item(Some("Same"), None)).unwrap();
        let b = normalize(SourceType::News, &news_item(Some("Same"), None)).unwrap();
        let c = normalize(SourceType::News, &news_item(Some("Other"), None)).unwrap();
        assert!(a.external_id.is_none());
        assert_eq!(a.content_fingerprint, b.content_fingerprint);
        assert_ne!(a.content_fingerprint, c.content_fingerprint);
    }

    #[test]
    fn blank_title_is_rejected() {
        let err = normalize(SourceType::News, &news_item(Some("  <br/> "), None)).unwrap_err();
        assert!(matches!(err, NormalizationError::MissingField { field: "title", .. }));
    }

    #[test]
    fn mismatched_source_is_rejected() {
        let err = normalize(SourceType::Weather, &news_item(Some("x"), None)).unwrap_err();
        assert!(matches!(err, NormalizationError::SourceMismatch { .. }));
    }

    #[test]
    fn weather_defaults_and_dt_fallback() {
        let raw = RawRecord::Weather(RawWeather {
            dt: Some(1_714_550_400),
            temperature: Some(NumberLike::Text("31.5 C".into())),
            humidity: Some(NumberLike::Text("--".into())),
            ..Default::default()
        });
        let rec = normalize(SourceType::Weather, &raw).unwrap();
        assert_eq!(rec.observed_at.timestamp(), 1_714_550_400);
        assert_eq!(rec.payload["location"], "unknown");
        assert_eq!(rec.payload["temperature"], 31.5);
        assert!(rec.payload["humidity"].is_null());
        assert!(rec.external_id.is_none());
    }

    #[test]
    fn pricing_key_is_market_item_day() {
        let raw = RawRecord::Pricing(RawPrice {
            item: Some("Samba Rice".into()),
            market: Some("Pettah".into()),
            price: Some("Rs. 240.00".into()),
            date: Some("2024-05-01 09:15:00".into()),
            ..Default::default()
        });
        let rec = normalize(SourceType::Pricing, &raw).unwrap();
        assert_eq!(rec.external_id.as_deref(), Some("pettah|samba rice|2024-05-01"));
        assert_eq!(rec.payload["price"], 240.0);
        assert_eq!(rec.payload["currency"], "LKR");
    }

    #[test]
    fn tax_period_sets_observed_at() {
        let raw = RawRecord::Tax(RawTax {
            period: Some("2024-q1".into()),
            total_revenue: Some("LKR 1,020,000".into()),
            source: Some("IRD".into()),
            ..Default::default()
        });
        let rec = normalize(SourceType::Tax, &raw).unwrap();
        assert_eq!(rec.payload["period_type"], "quarterly");
        assert_eq!(rec.payload["total_revenue"], 1_020_000.0);
        assert_eq!(rec.observed_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn video_requires_id() {
        let raw = RawRecord::Youtube(RawVideo {
            title: Some("x".into()),
            published_at: Some("2024-05-01".into()),
            ..Default::default()
        });
        assert!(normalize(SourceType::Youtube, &raw).is_err());
    }
}
