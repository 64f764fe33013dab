// src/config/pipeline.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::orchestrator::OrchestratorConfig;
use crate::ingest::retention::RetentionPolicy;
use crate::ingest::scheduler::MAX_INTERVAL;
use crate::ingest::types::SourceType;

pub const ENV_PATH: &str = "PIPELINE_CONFIG_PATH";

/// Upper bound for the collector timeout and the run deadline (one week).
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub collector_timeout_secs: u64,
    pub run_deadline_secs: u64,
    /// Absent = cross-batch dedup checks everything stored.
    pub dedup_lookback_hours: Option<u64>,
    /// Finalized batch reports kept in memory for status queries.
    pub batch_history: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            collector_timeout_secs: 30,
            run_deadline_secs: 120,
            dedup_lookback_hours: None,
            batch_history: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsSection {
    pub io_workers: usize,
    pub cpu_workers: usize,
}

impl Default for PoolsSection {
    fn default() -> Self {
        Self {
            io_workers: 20,
            cpu_workers: 5,
        }
    }
}

/// Interval seconds per job; 0 disables the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub news: u64,
    pub weather: u64,
    pub youtube: u64,
    pub trends: u64,
    pub pricing: u64,
    pub tax: u64,
    pub retention_secs: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            news: 900,
            weather: 1800,
            youtube: 3600,
            trends: 3600,
            pricing: 86_400,
            tax: 86_400,
            retention_secs: 86_400,
        }
    }
}

impl ScheduleSection {
    pub fn interval_for(&self, source: SourceType) -> Option<Duration> {
        let secs = match source {
            SourceType::News => self.news,
            SourceType::Weather => self.weather,
            SourceType::Youtube => self.youtube,
            SourceType::Trends => self.trends,
            SourceType::Pricing => self.pricing,
            SourceType::Tax => self.tax,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    pub fn retention_interval(&self) -> Option<Duration> {
        (self.retention_secs > 0).then(|| Duration::from_secs(self.retention_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorsSection {
    /// `<dir>/<source>.json` files become fixture collectors.
    pub fixture_dir: Option<PathBuf>,
    /// RSS feed files (or URLs with the `ingest-http` feature).
    pub news_rss: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline: PipelineSection,
    pub pools: PoolsSection,
    pub schedule: ScheduleSection,
    pub retention: RetentionPolicy,
    pub collectors: CollectorsSection,
}

impl PipelineConfig {
    /// Load from an explicit path. TOML or JSON, picked by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse(&content, &ext)
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) config/pipeline.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = Self::load_file_default()?;
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    fn load_file_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from("config/pipeline.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/pipeline.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    /// Invalid or empty values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u64("COLLECTOR_TIMEOUT_SECS") {
            self.pipeline.collector_timeout_secs = v;
        }
        if let Some(v) = env_u64("RUN_DEADLINE_SECS") {
            self.pipeline.run_deadline_secs = v;
        }
        if let Some(v) = env_u64("IO_WORKERS") {
            self.pools.io_workers = v as usize;
        }
        if let Some(v) = env_u64("CPU_WORKERS") {
            self.pools.cpu_workers = v as usize;
        }
    }

    fn sanitize(&mut self) {
        self.pools.io_workers = self.pools.io_workers.max(1);
        self.pools.cpu_workers = self.pools.cpu_workers.max(1);
        self.pipeline.collector_timeout_secs = self.pipeline.collector_timeout_secs.clamp(1, MAX_TIMEOUT_SECS);
        self.pipeline.run_deadline_secs = self.pipeline.run_deadline_secs.clamp(1, MAX_TIMEOUT_SECS);
        self.pipeline.batch_history = self.pipeline.batch_history.max(1);

        let max_interval = MAX_INTERVAL.as_secs();
        let s = &mut self.schedule;
        for secs in [
            &mut s.news,
            &mut s.weather,
            &mut s.youtube,
            &mut s.trends,
            &mut s.pricing,
            &mut s.tax,
            &mut s.retention_secs,
        ] {
            *secs = (*secs).min(max_interval);
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            collector_timeout: Duration::from_secs(self.pipeline.collector_timeout_secs),
            run_deadline: Duration::from_secs(self.pipeline.run_deadline_secs),
            dedup_lookback: self
                .pipeline
                .dedup_lookback_hours
                .map(|h| Duration::from_secs(h.saturating_mul(3600))),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        _ => {
            if let Ok(v) = serde_json::from_str(s) {
                return Ok(v);
            }
            toml::from_str(s).map_err(|e| anyhow!("unsupported pipeline config format: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = parse(
            r#"
            [pipeline]
            collector_timeout_secs = 5

            [schedule]
            tax = 0
            "#,
            "toml",
        )
        .unwrap();
        assert_eq!(cfg.pipeline.collector_timeout_secs, 5);
        assert_eq!(cfg.pipeline.run_deadline_secs, 120);
        assert_eq!(cfg.schedule.interval_for(SourceType::Tax), None);
        assert_eq!(
            cfg.schedule.interval_for(SourceType::News),
            Some(Duration::from_secs(900))
        );
        assert_eq!(cfg.retention.pricing, 60);
    }

    #[test]
    fn zero_workers_clamp_to_one() {
        let mut cfg = parse(r#"{"pools":{"io_workers":0,"cpu_workers":0}}"#, "json").unwrap();
        cfg.sanitize();
        assert_eq!(cfg.pools.io_workers, 1);
        assert_eq!(cfg.pools.cpu_workers, 1);
    }

    #[test]
    fn oversized_durations_clamp_to_bounds() {
        let mut cfg = PipelineConfig::default();
        cfg.pipeline.run_deadline_secs = u64::MAX;
        cfg.pipeline.collector_timeout_secs = u64::MAX;
        cfg.schedule.retention_secs = u64::MAX;
        cfg.sanitize();
        assert_eq!(cfg.pipeline.run_deadline_secs, MAX_TIMEOUT_SECS);
        assert_eq!(cfg.pipeline.collector_timeout_secs, MAX_TIMEOUT_SECS);
        assert_eq!(cfg.schedule.retention_interval(), Some(MAX_INTERVAL));
        assert_eq!(cfg.schedule.news, 900);
    }
}
