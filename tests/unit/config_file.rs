//! Loading configuration files from disk

use record_ingest::config::{ConfigError, IngestConfig};
use record_ingest::ingest::rate_limit::LimiterScopeKind;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"{
            "database": "data/court.db",
            "api": {
                "base_url": "https://api.example.org",
                "endpoint": "/v1/search",
                "page_size": 50,
                "content_field": "text",
                "extra_params": {"lang": "pt"}
            },
            "rate_limit": {"max_requests": 144, "window_secs": 60, "scope": "partition"},
            "retry": {"max_attempts": 5},
            "concurrency": 4,
            "partitions": [
                {"source": "TJSP", "date_range": {"start": "2024-01-01", "end": "2024-01-31"}},
                {"id": "stf-q1", "source": "STF", "date_range": {"start": "2024-01-01", "end": "2024-03-31"}, "max_pages": 10}
            ]
        }"#,
    );

    let config = IngestConfig::load(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.database.to_str(), Some("data/court.db"));
    assert_eq!(config.api.url(), "https://api.example.org/v1/search");
    assert_eq!(config.api.extra_params.get("lang").map(String::as_str), Some("pt"));
    assert_eq!(config.rate_limit.max_requests, 144);
    assert_eq!(config.rate_limit.scope, LimiterScopeKind::Partition);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.base_delay_ms, 1000);
    assert_eq!(config.partitions[0].id, "TJSP:2024-01-01..2024-01-31");
    assert_eq!(config.partitions[1].id, "stf-q1");
    assert_eq!(config.partitions[1].max_pages, Some(10));
}

#[test]
fn test_missing_file_is_read_error() {
    let result = IngestConfig::load("/nonexistent/ingest.json".as_ref());
    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

#[test]
fn test_malformed_json_is_parse_error() {
    let file = write_config("{ not json");
    assert!(matches!(
        IngestConfig::load(file.path()),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_validation_rejects_unusable_values() {
    let base = r#""api": {"base_url": "http://localhost"}"#;
    let cases = [
        format!(r#"{{{base}, "batch_size": 0}}"#),
        format!(r#"{{{base}, "concurrency": 33}}"#),
        format!(r#"{{{base}, "rate_limit": {{"max_requests": 0}}}}"#),
        format!(r#"{{{base}, "rate_limit": {{"window_secs": 0}}}}"#),
        format!(r#"{{{base}, "retry": {{"max_attempts": 0}}}}"#),
        format!(
            r#"{{{base}, "partitions": [{{"source": "a", "date_range": {{"start": "2024-02-01", "end": "2024-01-01"}}}}]}}"#
        ),
        r#"{"api": {"base_url": "ftp://localhost"}}"#.to_string(),
    ];

    for case in cases {
        let config = IngestConfig::from_json(&case).unwrap();
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid(_))),
            "accepted invalid config: {case}"
        );
    }
}
