#![allow(clippy::unwrap_used)]
// Config file loading, env overrides, and manifest files.

use std::path::Path;
use std::time::Duration;

use figment::Jail;
use pretty_assertions::assert_eq;

use geolayer_config::{Config, ConfigError, load_config_from, load_manifest, save_config_to};

#[test]
fn test_missing_file_yields_defaults() {
    Jail::expect_with(|_jail| {
        let cfg = load_config_from(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(cfg, Config::default());
        Ok(())
    });
}

#[test]
fn test_file_values_override_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
                [fetch]
                timeout_secs = 10
                max_retries = 5

                [batch]
                concurrency = 8

                [processing]
                default_tolerance = 0.0005
            "#,
        )?;

        let cfg = load_config_from(Path::new("config.toml")).unwrap();
        let runtime = cfg.to_pipeline_config().unwrap();
        assert_eq!(runtime.fetch.timeout, Duration::from_secs(10));
        assert_eq!(runtime.fetch.max_retries, 5);
        assert_eq!(runtime.batch.concurrency, 8);
        assert_eq!(runtime.processing.default_tolerance, Some(0.0005));
        // Untouched sections keep their defaults.
        assert_eq!(runtime.icons.concurrency, 3);
        Ok(())
    });
}

#[test]
fn test_env_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[batch]\nconcurrency = 8\n")?;
        jail.set_env("GEOLAYER_BATCH__CONCURRENCY", "2");
        jail.set_env("GEOLAYER_ICONS__MAX_ATTEMPTS", "7");
        jail.set_env("GEOLAYER_CACHE__PERSISTENT", "false");

        let cfg = load_config_from(Path::new("config.toml")).unwrap();
        assert_eq!(cfg.batch.concurrency, 2);
        assert_eq!(cfg.icons.max_attempts, 7);
        assert!(!cfg.cache.persistent);
        Ok(())
    });
}

#[test]
fn test_bad_value_is_a_figment_error() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[batch]\nconcurrency = \"lots\"\n")?;
        let err = load_config_from(Path::new("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Figment(_)));
        Ok(())
    });
}

#[test]
fn test_save_then_load_preserves_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut cfg = Config::default();
    cfg.fetch.user_agent = Some("geolayer-test/1.0".into());
    cfg.cache.directory = Some(dir.path().join("cache"));
    cfg.defaults.output = "json".into();
    save_config_to(&cfg, &path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[fetch]"));
    assert!(text.contains("geolayer-test/1.0"));

    let loaded: Config = toml::from_str(&text).unwrap();
    assert_eq!(loaded, cfg);
}

#[test]
fn test_manifest_file_loads_json_and_toml() {
    let dir = tempfile::tempdir().unwrap();

    let toml_path = dir.path().join("layers.toml");
    std::fs::write(
        &toml_path,
        "[[layers]]\nkey = \"a\"\nurl = \"https://example.com/a\"\n\n[[layers]]\nkey = \"b\"\nurl = \"https://example.com/b\"\n",
    )
    .unwrap();
    let layers = load_manifest(&toml_path).unwrap();
    let keys: Vec<_> = layers.iter().map(|l| l.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b"]);

    let json_path = dir.path().join("layers.json");
    std::fs::write(
        &json_path,
        r#"{"base_url":"https://example.com/","layers":[{"key":"c","url":"c.geojson","type":"waterway"}]}"#,
    )
    .unwrap();
    let layers = load_manifest(&json_path).unwrap();
    assert_eq!(layers[0].url, "https://example.com/c.geojson");

    let err = load_manifest(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
