use super::*;

fn parse(args: &[&str]) -> Config {
    let argv = std::iter::once("cocaine").chain(args.iter().copied());
    let parsed = ConfigArgs::try_parse_from(argv).expect("args should parse");
    parsed.config
}

#[test]
fn defaults_match_standalone_runtime() {
    let cfg = parse(&[]);
    assert_eq!(cfg, Config::default());
    assert_eq!(cfg.application_name(), "standalone");
    assert_eq!(cfg.endpoint(), "");
    assert_eq!(cfg.locators(), ["localhost:10053".to_owned()]);
    assert_eq!(cfg.protocol(), 0);
    assert!(cfg.uuid().is_none());
    assert!(!cfg.debug());
}

#[test]
fn locator_flag_splits_on_commas() {
    let cfg = parse(&["--locator", "host-a:10053,host-b:10054"]);
    assert_eq!(cfg.locators(), ["host-a:10053".to_owned(), "host-b:10054".to_owned()]);
}

#[test]
fn single_locator_is_kept_whole() {
    let cfg = parse(&["--locator", "10.0.0.1:10053"]);
    assert_eq!(cfg.locators(), ["10.0.0.1:10053".to_owned()]);
}

#[test]
fn parses_identity_flags() {
    let id = Uuid::parse_str("6f9619ff-8b86-d011-b42d-00c04fc964ff").expect("uuid literal");
    let cfg = parse(&[
        "--app",
        "echo",
        "--endpoint",
        "/run/cocaine/echo.sock",
        "--protocol",
        "1",
        "--uuid",
        &id.to_string(),
    ]);
    assert_eq!(cfg.application_name(), "echo");
    assert_eq!(cfg.endpoint(), "/run/cocaine/echo.sock");
    assert_eq!(cfg.protocol(), 1);
    assert_eq!(cfg.uuid(), Some(id));
}

#[test]
fn rejects_malformed_uuid() {
    let err = Config::parse_from(["cocaine", "--uuid", "not-a-uuid"]).expect_err("uuid");
    assert!(matches!(err, ConfigError::Args(_)));
}

#[test]
fn rejects_unknown_flag() {
    assert!(Config::parse_from(["cocaine", "--bogus"]).is_err());
}

#[test]
fn debug_env_is_case_insensitive() {
    assert!(Config::default().with_debug_env(Some("DEBUG")).debug());
    assert!(Config::default().with_debug_env(Some("Debug")).debug());
    assert!(!Config::default().with_debug_env(Some("1")).debug());
    assert!(!Config::default().with_debug_env(None).debug());
}

#[test]
fn with_locators_replaces_list() {
    let cfg = Config::default().with_locators(vec!["127.0.0.1:1".to_owned()]);
    assert_eq!(cfg.locators(), ["127.0.0.1:1".to_owned()]);
}
