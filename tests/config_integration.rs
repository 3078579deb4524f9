//! Configuration loading through the public API.

use std::io::Write;
use std::time::Duration;

use dirtail::config::{ConfigError, ConfigLoader, TailConfig};
use dirtail::tail::EngineOptions;
use tempfile::NamedTempFile;

fn load(content: &str) -> Result<TailConfig, ConfigError> {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    ConfigLoader::with_path(file.path().to_path_buf()).load()
}

#[test]
fn test_full_config_to_engine_options() {
    let config = load(
        r#"
        dirs = "app audit"
        unlock_file_time = 3
        reap_interval_secs = 5
        debounce_ms = 250

        [directories.app]
        path = "/var/log/app"
        filename_pattern = '.*\.log$'

        [directories.audit]
        path = "/var/log/audit"

        [headers]
        basename_header = true
        basename_header_key = "source"
        "#,
    )
    .unwrap();

    let roots = config.resolve_roots().unwrap();
    assert_eq!(roots.len(), 2);
    assert!(roots[0].accepts(std::path::Path::new("/var/log/app/x.log")));
    assert!(!roots[0].accepts(std::path::Path::new("/var/log/app/x.gz")));
    assert!(roots[1].accepts(std::path::Path::new("/var/log/audit/anything")));

    let options = EngineOptions::from(&config);
    assert_eq!(options.idle_timeout, Duration::from_secs(180));
    assert_eq!(options.reap_interval, Duration::from_secs(5));
    assert_eq!(options.debounce, Duration::from_millis(250));
    assert!(options.headers.basename_header);
    assert_eq!(options.headers.basename_header_key, "source");
}

#[test]
fn test_unknown_identifier_is_skipped() {
    let config = load(
        r#"
        dirs = "missing app"

        [directories.app]
        path = "/var/log/app"
        "#,
    )
    .unwrap();

    let roots = config.resolve_roots().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, "app");
}

#[test]
fn test_only_unknown_identifiers_is_an_error() {
    let config = load(r#"dirs = "nothing""#).unwrap();
    assert!(matches!(
        config.resolve_roots(),
        Err(ConfigError::NoDirectories)
    ));
}

#[test]
fn test_invalid_pattern_names_the_directory() {
    let config = load(
        r#"
        dirs = "app"

        [directories.app]
        path = "/var/log/app"
        filename_pattern = "(unclosed"
        "#,
    )
    .unwrap();

    let err = config.resolve_roots().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPattern { ref id, .. } if id == "app"));
}
