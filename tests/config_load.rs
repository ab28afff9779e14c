// tests/config_load.rs
//
// Env-driven config lookup. Tests touching PIPELINE_CONFIG_PATH run serially.

use std::fs;

use serial_test::serial;
use tempfile::tempdir;

use feed_pulse::config::{PipelineConfig, ENV_PIPELINE_CONFIG_PATH};
use feed_pulse::ingest::ContentSafety;

#[test]
#[serial]
fn env_path_toml_overrides_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    fs::write(
        &path,
        r#"
channels = ["science", "r/Technology"]
content_safety = "unrestricted"
publish_interval_ms = 1500

[feed]
base_url = "http://localhost:9999/api/reddit"
max_retries = 4

[scoring]
half_life_hours = 3.0

[scoring.weights]
engagement = 0.5
recency = 0.25
quality = 0.25

[scheduling]
peak_hours_utc = [8, 9, 10]
max_per_channel_per_hour = 2
"#,
    )
    .unwrap();

    std::env::set_var(ENV_PIPELINE_CONFIG_PATH, &path);
    let cfg = PipelineConfig::load_default();
    std::env::remove_var(ENV_PIPELINE_CONFIG_PATH);
    let cfg = cfg.unwrap();

    assert_eq!(cfg.channels, vec!["science", "r/Technology"]);
    assert_eq!(cfg.content_safety, ContentSafety::Unrestricted);
    assert_eq!(cfg.publish_interval_ms, 1500);
    assert_eq!(cfg.ingest_interval_ms, 30_000);
    assert_eq!(cfg.feed.base_url, "http://localhost:9999/api/reddit");
    assert_eq!(cfg.feed.max_retries, 4);
    assert_eq!(cfg.feed.limit, 25);
    assert_eq!(cfg.scoring.half_life_hours, 3.0);
    assert_eq!(cfg.scoring.weights.engagement, 0.5);
    assert!(cfg.scheduling.peak_hours_utc.contains(&9));
    assert!(!cfg.scheduling.peak_hours_utc.contains(&14));
    assert_eq!(cfg.scheduling.max_per_channel_per_hour, 2);
}

#[test]
#[serial]
fn env_path_json_is_accepted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    fs::write(&path, r#"{ "max_working_set": 50, "published_retention_secs": 600 }"#).unwrap();

    std::env::set_var(ENV_PIPELINE_CONFIG_PATH, &path);
    let cfg = PipelineConfig::load_default();
    std::env::remove_var(ENV_PIPELINE_CONFIG_PATH);
    let cfg = cfg.unwrap();

    assert_eq!(cfg.max_working_set, 50);
    assert_eq!(cfg.published_retention_secs, 600);
    assert_eq!(cfg.scheduling.max_batch, 10);
}

#[test]
#[serial]
fn missing_env_path_is_an_error() {
    let dir = tempdir().unwrap();
    std::env::set_var(ENV_PIPELINE_CONFIG_PATH, dir.path().join("nope.toml"));
    let res = PipelineConfig::load_default();
    std::env::remove_var(ENV_PIPELINE_CONFIG_PATH);
    assert!(res.is_err());
}

#[test]
#[serial]
fn invalid_values_are_rejected_on_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "channels = []\n").unwrap();
    let err = PipelineConfig::load_from(&path).unwrap_err();
    assert!(format!("{err:#}").contains("channels"));
}
