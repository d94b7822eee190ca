use super::*;

fn ranking_command(overrides: &[&str]) -> Command {
    let mut argv = vec!["popcache", "ranking", "asset-1", "--action", "LIKE"];
    argv.extend_from_slice(overrides);
    CliArgs::parse_from(argv).command
}

#[test]
fn defaults_apply_without_sources() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.redis.url, DEFAULT_REDIS_URL);
    assert_eq!(settings.redis.connect_retry, Duration::from_secs(60));
    assert_eq!(settings.database.url, None);
    assert_eq!(settings.database.max_connections.get(), 8);
    assert!(settings.popular.top_level_only);
    assert_eq!(settings.popular.store, StoreKind::Redis);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.redis.url = Some("redis://from-file:6379".to_string());
    raw.popular.store = Some("redis".to_string());

    let command = ranking_command(&[
        "--log-level",
        "debug",
        "--redis-url",
        "redis://from-cli:6379",
        "--store",
        "memory",
    ]);
    raw.apply_command_overrides(&command);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.redis.url, "redis://from-cli:6379");
    assert_eq!(settings.popular.store, StoreKind::Memory);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let command = ranking_command(&["--log-json", "true"]);

    raw.apply_command_overrides(&command);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_connect_retry_is_rejected() {
    let mut raw = RawSettings::default();
    raw.redis.connect_retry_seconds = Some(0);

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "redis.connect_retry_seconds",
            ..
        }
    ));
}

#[test]
fn unknown_store_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.popular.store = Some("memcached".to_string());

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { key: "popular.store", .. }));
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.database.url, None);
}

#[test]
fn parse_ranking_arguments() {
    let args = CliArgs::parse_from([
        "popcache",
        "ranking",
        "asset-9",
        "--action",
        "FLAG",
        "--limit",
        "5",
        "--offset",
        "10",
        "--json",
        "--database-url",
        "postgres://example",
    ]);

    match args.command {
        Command::Ranking(ranking) => {
            assert_eq!(ranking.asset_id, "asset-9");
            assert_eq!(ranking.action_type, "FLAG");
            assert_eq!(ranking.limit, 5);
            assert_eq!(ranking.offset, 10);
            assert!(ranking.json);
            assert_eq!(
                ranking.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_record_arguments() {
    let args = CliArgs::parse_from([
        "popcache", "record", "asset-1", "comment-7", "--action", "LIKE", "--delete",
    ]);

    match args.command {
        Command::Record(record) => {
            assert_eq!(record.asset_id, "asset-1");
            assert_eq!(record.comment_id, "comment-7");
            assert_eq!(record.action_type, "LIKE");
            assert!(record.delete);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn ranking_defaults_to_first_page() {
    match ranking_command(&[]) {
        Command::Ranking(ranking) => {
            assert_eq!(ranking.limit, DEFAULT_RANKING_LIMIT);
            assert_eq!(ranking.offset, 0);
            assert!(!ranking.json);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn migrate_applies_database_override() {
    let mut raw = RawSettings::default();
    let args = CliArgs::parse_from(["popcache", "migrate", "--database-url", "postgres://cli"]);

    raw.apply_command_overrides(&args.command);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.database.url.as_deref(), Some("postgres://cli"));
}
