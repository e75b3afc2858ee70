use std::io::Write;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.cache.global_ttl_seconds = Some(60);

    let overrides = Overrides {
        log_level: Some("debug".to_string()),
        cache_ttl_seconds: Some(30),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.global_ttl, Duration::from_secs(30));
}

#[test]
fn cache_settings_use_correct_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.global_ttl, Duration::from_secs(600));
    assert_eq!(settings.cache.max_entries.get(), 10_000);
    assert_eq!(settings.cache.tracked_post_types, vec!["post", "page"]);
    assert_eq!(settings.cache.tracked_taxonomies, vec!["category", "post_tag"]);
    assert_eq!(settings.cache.private_meta_prefix, "_");
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn zero_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.global_ttl_seconds = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero ttl is invalid");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.global_ttl_seconds",
            ..
        }
    ));
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(0);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn blank_type_names_are_dropped() {
    let mut raw = RawSettings::default();
    raw.cache.tracked_post_types = Some(vec![" article ".into(), "".into()]);
    raw.cache.private_meta_prefix = Some(String::new());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.tracked_post_types, vec!["article"]);
    assert!(settings.cache.private_meta_prefix.is_empty());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_overrides(&Overrides {
        log_json: Some(true),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn parse_key_arguments() {
    let args = CliArgs::parse_from([
        "nodecache",
        "key",
        "--query",
        "{ posts { id } }",
        "--variables",
        r#"{"first": 10}"#,
        "--operation",
        "Posts",
        "--cache-enabled=false",
    ]);

    assert_eq!(args.overrides.cache_enabled, Some(false));
    match args.command {
        Command::Key(key) => {
            assert_eq!(key.query.as_deref(), Some("{ posts { id } }"));
            assert_eq!(key.variables.as_deref(), Some(r#"{"first": 10}"#));
            assert_eq!(key.operation_name.as_deref(), Some("Posts"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_replay_arguments() {
    let args = CliArgs::parse_from(["nodecache", "replay", "demos/scenario.json"]);

    match args.command {
        Command::Replay(replay) => {
            assert_eq!(replay.scenario, PathBuf::from("demos/scenario.json"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn config_file_is_layered_under_cli() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config file");
    writeln!(
        file,
        r#"
[logging]
level = "warn"

[cache]
global_ttl_seconds = 120
tracked_post_types = ["post", "article"]
tracked_taxonomies = ["genre"]
private_meta_prefix = "wp_"
"#
    )
    .expect("write config");

    let path = file.path().to_string_lossy().into_owned();
    let args = CliArgs::parse_from([
        "nodecache",
        "--config-file",
        path.as_str(),
        "--cache-max-entries",
        "50",
        "replay",
        "scenario.json",
    ]);

    let settings = load(&args).expect("settings load");
    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert_eq!(settings.cache.global_ttl, Duration::from_secs(120));
    assert_eq!(settings.cache.max_entries.get(), 50);
    assert_eq!(settings.cache.tracked_post_types, vec!["post", "article"]);
    assert_eq!(settings.cache.tracked_taxonomies, vec!["genre"]);
    assert_eq!(settings.cache.private_meta_prefix, "wp_");
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.toml");
    let args = CliArgs {
        config_file: Some(missing),
        overrides: Overrides::default(),
        command: Command::Key(KeyArgs::default()),
    };

    assert!(matches!(load(&args), Err(LoadError::Build(_))));
}
