// src/ingest/types.rs
//! Shared data model: source types, raw collector output, and the common
//! `IngestRecord` envelope every source is normalized into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the six data domains the pipeline ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    News,
    Weather,
    Youtube,
    Trends,
    Pricing,
    Tax,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::News,
        SourceType::Weather,
        SourceType::Youtube,
        SourceType::Trends,
        SourceType::Pricing,
        SourceType::Tax,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::News => "news",
            SourceType::Weather => "weather",
            SourceType::Youtube => "youtube",
            SourceType::Trends => "trends",
            SourceType::Pricing => "pricing",
            SourceType::Tax => "tax",
        }
    }

    /// Store collection holding this source's records.
    pub fn collection(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSource(pub String);

impl fmt::Display for UnknownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown source `{}`", self.0)
    }
}

impl std::error::Error for UnknownSource {}

impl FromStr for SourceType {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => Ok(SourceType::News),
            "weather" => Ok(SourceType::Weather),
            "youtube" => Ok(SourceType::Youtube),
            "trends" => Ok(SourceType::Trends),
            "pricing" => Ok(SourceType::Pricing),
            "tax" => Ok(SourceType::Tax),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// A number as scraped: either already numeric or a free-form string such
/// as `"Rs. 1,250.00"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberLike {
    Num(f64),
    Text(String),
}

impl From<f64> for NumberLike {
    fn from(v: f64) -> Self {
        NumberLike::Num(v)
    }
}

impl From<&str> for NumberLike {
    fn from(v: &str) -> Self {
        NumberLike::Text(v.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNews {
    pub title: Option<String>,
    pub content: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawWeather {
    pub location: Option<String>,
    pub city_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub temperature: Option<NumberLike>,
    pub humidity: Option<NumberLike>,
    pub rainfall: Option<NumberLike>,
    pub wind_speed: Option<NumberLike>,
    pub condition: Option<String>,
    /// Reading time as text.
    pub observed_at: Option<String>,
    /// Reading time as unix seconds (OpenWeather `dt`), used when `observed_at` is absent.
    pub dt: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVideo {
    pub video_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    pub published_at: Option<String>,
    pub view_count: Option<NumberLike>,
    pub like_count: Option<NumberLike>,
    pub comment_count: Option<NumberLike>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrend {
    pub keyword: Option<String>,
    pub geo: Option<String>,
    pub timestamp: Option<String>,
    pub value: Option<NumberLike>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPrice {
    pub item: Option<String>,
    pub market: Option<String>,
    pub location: Option<String>,
    pub price: Option<NumberLike>,
    pub unit: Option<String>,
    pub currency: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTax {
    /// `YYYY`, `YYYY-MM` or `YYYY-Qn`.
    pub period: Option<String>,
    pub period_type: Option<String>,
    pub total_revenue: Option<NumberLike>,
    pub currency: Option<String>,
    pub source: Option<String>,
}

/// Source-shaped record as produced by a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawRecord {
    News(RawNews),
    Weather(RawWeather),
    Youtube(RawVideo),
    Trends(RawTrend),
    Pricing(RawPrice),
    Tax(RawTax),
}

impl RawRecord {
    pub fn source_type(&self) -> SourceType {
        match self {
            RawRecord::News(_) => SourceType::News,
            RawRecord::Weather(_) => SourceType::Weather,
            RawRecord::Youtube(_) => SourceType::Youtube,
            RawRecord::Trends(_) => SourceType::Trends,
            RawRecord::Pricing(_) => SourceType::Pricing,
            RawRecord::Tax(_) => SourceType::Tax,
        }
    }
}

/// Hex SHA-256 identifying one logical record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Common envelope for every ingested record.
///
/// Built by the normalizer; the orchestrator stamps `batch_id` and
/// `ingested_at` by producing a new value (see [`IngestRecord::accepted`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub source_type: SourceType,
    pub external_id: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub content_fingerprint: Fingerprint,
    pub batch_id: Option<String>,
    pub ingested_at: Option<DateTime<Utc>>,
}

impl IngestRecord {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.content_fingerprint
    }

    /// Stamp the record for insertion into the store.
    pub fn accepted(self, batch_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            batch_id: Some(batch_id.to_string()),
            ingested_at: Some(at),
            ..self
        }
    }

    /// Document representation handed to the store.
    pub fn to_document(&self) -> serde_json::Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            // IngestRecord is a struct, always serialized as an object.
            _ => Ok(serde_json::Map::new()),
        }
    }
}
