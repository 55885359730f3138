use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.admin_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        admin_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.admin_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_use_memory_store() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.store.backend, StoreBackend::Memory);
    assert!(settings.store.redis_url.is_none());
    assert_eq!(settings.store.redis_pool_size.get(), DEFAULT_REDIS_POOL_SIZE);
    assert_eq!(settings.server.admin_addr.port(), DEFAULT_ADMIN_PORT);
}

#[test]
fn cache_settings_use_correct_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.default_ttl_seconds.get(), 300);
    assert_eq!(settings.cache.store_timeout, Duration::from_millis(1000));
    assert_eq!(settings.cache.max_body_bytes.get(), 1_048_576);
    assert!(settings.cache.warm_concurrency.is_none());
}

#[test]
fn cache_settings_can_be_overridden_via_cli() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        cache_enabled: Some(false),
        cache_max_body_bytes: Some(2048),
        cache_warm_concurrency: Some(4),
        store: StoreOverrides {
            store_timeout_ms: Some(250),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");
    let config = settings.cache.to_cache_config();

    assert!(!config.enabled);
    assert_eq!(config.max_body_bytes, 2048);
    assert_eq!(config.warm_concurrency, Some(4));
    assert_eq!(config.store_timeout(), Duration::from_millis(250));
    assert_eq!(config.default_ttl_seconds, 300);
}

#[test]
fn redis_backend_requires_url() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some("redis".to_string());

    let err = Settings::from_raw(raw).expect_err("missing url rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "store.redis_url",
            ..
        }
    ));
}

#[test]
fn redis_url_must_use_redis_scheme() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some("redis".to_string());
    raw.store.redis_url = Some("http://localhost:6379".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn redis_backend_accepts_url() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some("Redis".to_string());
    raw.store.redis_url = Some(" redis://127.0.0.1:6379/0 ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.store.backend, StoreBackend::Redis);
    assert_eq!(
        settings.store.redis_url.as_deref(),
        Some("redis://127.0.0.1:6379/0")
    );
}

#[test]
fn unknown_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some("memcached".to_string());

    let err = Settings::from_raw(raw).expect_err("unknown backend rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "store.backend",
            ..
        }
    ));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.store_timeout_ms = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.cache.warm_concurrency = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.server.graceful_shutdown_seconds = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["cachegate"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "cachegate",
        "serve",
        "--server-admin-port",
        "9000",
        "--store-backend",
        "redis",
        "--redis-url",
        "redis://cache:6379",
        "--cache-enabled=false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.admin_port, Some(9000));
            assert_eq!(serve.overrides.store.backend.as_deref(), Some("redis"));
            assert_eq!(
                serve.overrides.store.redis_url.as_deref(),
                Some("redis://cache:6379")
            );
            assert_eq!(serve.overrides.cache_enabled, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_invalidate_arguments() {
    let args = CliArgs::parse_from([
        "cachegate",
        "invalidate",
        "--redis-url",
        "redis://cache:6379",
        "api:/users/42*",
        "api:/posts*",
    ]);

    match args.command.expect("invalidate command") {
        Command::Invalidate(invalidate) => {
            assert_eq!(invalidate.patterns, vec!["api:/users/42*", "api:/posts*"]);
            assert_eq!(
                invalidate.store.redis_url.as_deref(),
                Some("redis://cache:6379")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn invalidate_requires_a_pattern() {
    assert!(CliArgs::try_parse_from(["cachegate", "invalidate"]).is_err());
}

#[test]
fn parse_stats_arguments() {
    let args = CliArgs::parse_from(["cachegate", "stats", "--cache-store-timeout-ms", "50"]);

    match args.command.expect("stats command") {
        Command::Stats(stats) => assert_eq!(stats.store.store_timeout_ms, Some(50)),
        _ => panic!("wrong command parsed"),
    }
}
