use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), DEFAULT_PUBLIC_PORT);
    assert_eq!(settings.build.deadline, Duration::from_secs(1800));
    assert_eq!(settings.lock.ttl, Duration::from_secs(600));
    assert_eq!(settings.object_store.acl, "public-read");
    assert_eq!(settings.ingestion.feed_max_entries.get(), 200);
    assert_eq!(settings.survey.cookie_name, DEFAULT_SURVEY_COOKIE);
    assert_eq!(
        settings.cdn.selective_targets,
        vec!["events/*", "people/*", "topics/*"]
    );
    assert!(settings.cdn.distribution_id.is_none());
}

#[test]
fn force_https_follows_the_site_base_scheme() {
    // The stock site base is https, so secure rendering is on.
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert!(settings.build.force_https);

    let mut raw = RawSettings::default();
    raw.cms.site_base = Some("http://portal.internal:8000".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(!settings.build.force_https);

    let mut raw = RawSettings::default();
    raw.cms.site_base = Some("http://portal.internal:8000".to_string());
    raw.build.force_https = Some(true);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.build.force_https);
}

#[test]
fn blank_distribution_id_disables_invalidation() {
    let mut raw = RawSettings::default();
    raw.cdn.distribution_id = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.cdn.distribution_id.is_none());
}

#[test]
fn zero_lock_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.lock.ttl_seconds = Some(0);
    let err = Settings::from_raw(raw).expect_err("ttl must be rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "lock.ttl_seconds",
            ..
        }
    ));
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
    let args = CliArgs::parse_from(["portalbake"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_ingest_arguments() {
    let args = CliArgs::parse_from([
        "portalbake",
        "ingest",
        "articles",
        "--database-url",
        "postgres://example",
    ]);

    match args.command.expect("ingest command") {
        Command::Ingest(ingest) => {
            assert!(matches!(ingest.kind, IngestKindArg::Articles));
            assert_eq!(
                ingest.overrides.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_invalidate_flags() {
    let args = CliArgs::parse_from(["portalbake", "invalidate", "--full", "--warm"]);
    match args.command.expect("invalidate command") {
        Command::Invalidate(invalidate) => {
            assert!(invalidate.full);
            assert!(invalidate.warm);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
