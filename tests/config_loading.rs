use std::io::Write;

use dcache::config::{self, LoadError, LogFormat};
use serial_test::serial;
use tempfile::NamedTempFile;
use tracing::level_filters::LevelFilter;

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("tmp file");
    file.write_all(contents.as_bytes()).expect("write tmp");
    file
}

#[test]
#[serial]
fn explicit_file_overrides_defaults() {
    let file = toml_file(
        r#"
[logging]
level = "debug"
json = true

[cache]
cleaner_interval_ms = 2500
service_name = "dhcp"
service_area = 4
"#,
    );

    let settings = config::load(Some(file.path())).expect("settings load");
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.cache.cleaner_interval_ms, 2500);
    assert_eq!(settings.cache.query_ttl_ms, 30_000);
    assert_eq!(settings.cache.service_name, "dhcp");
    assert_eq!(settings.cache.service_area, 4);
    assert!(settings.cache.start_cleaner);
}

#[test]
#[serial]
fn environment_wins_over_file() {
    let file = toml_file("[cache]\nquery_ttl_ms = 1000\n");

    // SAFETY: tests touching the environment are serialized.
    unsafe { std::env::set_var("DCACHE__CACHE__QUERY_TTL_MS", "4000") };
    let settings = config::load(Some(file.path()));
    unsafe { std::env::remove_var("DCACHE__CACHE__QUERY_TTL_MS") };

    let settings = settings.expect("settings load");
    assert_eq!(settings.cache.query_ttl_ms, 4000);
}

#[test]
#[serial]
fn invalid_values_are_reported() {
    let file = toml_file("[cache]\nquery_ttl_ms = 0\n");
    let err = config::load(Some(file.path())).expect_err("zero ttl");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.query_ttl_ms",
            ..
        }
    ));

    let file = toml_file("[logging]\nlevel = \"shouting\"\n");
    let err = config::load(Some(file.path())).expect_err("bad level");
    assert!(err.to_string().contains("logging.level"));
}

#[test]
#[serial]
fn missing_explicit_file_fails_to_build() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let err = config::load(Some(&path)).expect_err("required file");
    assert!(matches!(err, LoadError::Build(_)));
}
