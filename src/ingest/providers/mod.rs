// src/ingest/providers/mod.rs
pub mod news_rss;
