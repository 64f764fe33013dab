// tests/pipeline_config.rs
use situational_ingest::app::build_collectors;
use situational_ingest::config::pipeline::{CollectorsSection, ENV_PATH, MAX_TIMEOUT_SECS};
use situational_ingest::ingest::scheduler::MAX_INTERVAL;
use situational_ingest::ingest::collector::Collector;
use situational_ingest::ingest::types::SourceType;
use situational_ingest::PipelineConfig;
use std::time::Duration;
use std::{env, fs};

const OVERRIDE_VARS: [&str; 4] = [
    "COLLECTOR_TIMEOUT_SECS",
    "RUN_DEADLINE_SECS",
    "IO_WORKERS",
    "CPU_WORKERS",
];

#[test]
fn parse_toml_and_json_paths() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("pipeline.toml");
    fs::write(
        &p_toml,
        r#"
[pipeline]
collector_timeout_secs = 10
dedup_lookback_hours = 48

[pools]
io_workers = 0

[retention]
news = 7
"#,
    )
    .unwrap();
    let c = PipelineConfig::load_from(&p_toml).unwrap();
    assert_eq!(c.pipeline.collector_timeout_secs, 10);
    assert_eq!(c.pools.io_workers, 1, "zero workers clamp to one");
    assert_eq!(c.pools.cpu_workers, 5);
    assert_eq!(c.retention.news, 7);
    assert_eq!(c.retention.tax, 180);
    let o = c.orchestrator();
    assert_eq!(o.collector_timeout, Duration::from_secs(10));
    assert_eq!(o.dedup_lookback, Some(Duration::from_secs(48 * 3600)));

    let p_json = dir.path().join("pipeline.json");
    fs::write(&p_json, r#"{"schedule":{"news":60,"tax":0}}"#).unwrap();
    let cj = PipelineConfig::load_from(&p_json).unwrap();
    assert_eq!(cj.schedule.interval_for(SourceType::News), Some(Duration::from_secs(60)));
    assert_eq!(cj.schedule.interval_for(SourceType::Tax), None);

    let bad = dir.path().join("pipeline.toml.bak");
    fs::write(&bad, "pipeline = [").unwrap();
    assert!(PipelineConfig::load_from(&bad).is_err());
}

#[test]
fn huge_values_load_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("pipeline.json");
    let max = u64::MAX;
    fs::write(
        &p,
        format!(r#"{{"pipeline":{{"run_deadline_secs":{max},"collector_timeout_secs":{max}}},"schedule":{{"news":{max}}}}}"#),
    )
    .unwrap();
    let c = PipelineConfig::load_from(&p).unwrap();
    let o = c.orchestrator();
    assert_eq!(o.run_deadline, Duration::from_secs(MAX_TIMEOUT_SECS));
    assert_eq!(o.collector_timeout, Duration::from_secs(MAX_TIMEOUT_SECS));
    assert_eq!(c.schedule.interval_for(SourceType::News), Some(MAX_INTERVAL));
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the repo's own config/ is not read.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_PATH);
    for k in OVERRIDE_VARS {
        env::remove_var(k);
    }

    // 1) nothing on disk -> defaults
    let c = PipelineConfig::load_default().unwrap();
    assert_eq!(c, PipelineConfig::default());

    // 2) ./config/pipeline.json fallback
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("pipeline.json"), r#"{"pools":{"io_workers":3}}"#).unwrap();
    assert_eq!(PipelineConfig::load_default().unwrap().pools.io_workers, 3);

    // 3) ./config/pipeline.toml wins over json
    fs::write(cfg_dir.join("pipeline.toml"), "[pools]\nio_workers = 4\n").unwrap();
    assert_eq!(PipelineConfig::load_default().unwrap().pools.io_workers, 4);

    // 4) env path wins over both
    let p_env = tmp.path().join("custom.toml");
    fs::write(&p_env, "[pools]\nio_workers = 9\n").unwrap();
    env::set_var(ENV_PATH, p_env.display().to_string());
    assert_eq!(PipelineConfig::load_default().unwrap().pools.io_workers, 9);

    // 5) env path to a missing file is an error, not a silent default
    env::set_var(ENV_PATH, tmp.path().join("nope.toml").display().to_string());
    assert!(PipelineConfig::load_default().is_err());
    env::remove_var(ENV_PATH);

    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_apply_and_garbage_is_ignored() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_PATH);

    env::set_var("COLLECTOR_TIMEOUT_SECS", " 7 ");
    env::set_var("RUN_DEADLINE_SECS", "soon");
    env::set_var("IO_WORKERS", "0");
    env::set_var("CPU_WORKERS", "2");
    let c = PipelineConfig::load_default().unwrap();
    assert_eq!(c.pipeline.collector_timeout_secs, 7);
    assert_eq!(c.pipeline.run_deadline_secs, 120);
    assert_eq!(c.pools.io_workers, 1);
    assert_eq!(c.pools.cpu_workers, 2);

    for k in OVERRIDE_VARS {
        env::remove_var(k);
    }
    env::set_current_dir(&old).unwrap();
}

#[test]
fn fixture_dir_registers_one_collector_per_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("weather.json"), "[]").unwrap();
    fs::write(dir.path().join("tax.json"), "[]").unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let reg = build_collectors(&CollectorsSection {
        fixture_dir: Some(dir.path().to_path_buf()),
        news_rss: Vec::new(),
    })
    .unwrap();
    assert_eq!(reg.sources(), vec![SourceType::Weather, SourceType::Tax]);

    let missing = build_collectors(&CollectorsSection {
        fixture_dir: Some(dir.path().join("absent")),
        news_rss: Vec::new(),
    });
    assert!(missing.is_err());
}

#[test]
fn rss_files_become_the_news_collector() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("news.json"), "[]").unwrap();
    let feed = dir.path().join("feed.xml");

    let reg = build_collectors(&CollectorsSection {
        fixture_dir: Some(dir.path().to_path_buf()),
        news_rss: vec![feed.display().to_string()],
    })
    .unwrap();
    assert_eq!(reg.len(), 1);
    assert_eq!(reg.get(SourceType::News).map(|c| c.name().to_string()).as_deref(), Some("news_rss"));
}
