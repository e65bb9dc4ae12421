use super::*;
use clap::CommandFactory;
use serde_json::json;

#[test]
fn command_tree_is_well_formed() {
    Cli::command().debug_assert();
}

#[test]
fn feed_defaults_to_first_page() {
    let cli = Cli::try_parse_from(["threadline", "feed"]).unwrap();
    let Command::Feed(page) = cli.command else {
        panic!("expected feed");
    };
    assert_eq!(page.resolve(DEFAULT_POST_PAGE_SIZE), Page::new(1, DEFAULT_POST_PAGE_SIZE));
}

#[test]
fn comment_create_accepts_parent() {
    let cli = Cli::try_parse_from(["threadline", "comment", "create", "7", "nice", "--parent", "3"]).unwrap();
    let Command::Comment(CommentCommand { command: CommentSubcommand::Create { post_id, content, parent } }) =
        cli.command
    else {
        panic!("expected comment create");
    };
    assert_eq!((post_id, content.as_str(), parent), (7, "nice", Some(3)));
}

#[test]
fn watch_collects_repeated_kind_filters() {
    let cli = Cli::try_parse_from(["threadline", "watch", "--kind", "post_created", "--kind", "post_liked"]).unwrap();
    let Command::Watch { kinds } = cli.command else {
        panic!("expected watch");
    };
    assert!(wants_event(&kinds, &RealtimeEvent::PostLiked(json!({}))));
    assert!(!wants_event(&kinds, &RealtimeEvent::CommentCreated(json!({}))));
    assert!(wants_event(&[], &RealtimeEvent::CommentCreated(json!({}))));
}

#[test]
fn api_url_override_rederives_push_url() {
    let base = ClientConfig::new("http://127.0.0.1:8000").unwrap();
    let config = resolve_config(base, Some("https://api.example.test/"), Some(PathBuf::from("/tmp/tl"))).unwrap();
    assert_eq!(config.api_base_url, "https://api.example.test");
    assert_eq!(config.push_base_url, "wss://api.example.test");
    assert_eq!(config.storage_dir, PathBuf::from("/tmp/tl"));
}

#[test]
fn api_url_override_keeps_explicit_push_url() {
    let base = ClientConfig::new("http://127.0.0.1:8000").unwrap().with_push_base_url("wss://push.example.test").unwrap();
    let config = resolve_config(base, Some("https://api.example.test"), None).unwrap();
    assert_eq!(config.api_base_url, "https://api.example.test");
    assert_eq!(config.push_base_url, "wss://push.example.test");
}

#[test]
fn render_event_applies_kind_filter() {
    let kinds = vec!["post_liked".to_owned()];
    let liked = RealtimeEvent::PostLiked(json!({"post_id": 4}));
    let line = render_event(&kinds, &liked).unwrap().unwrap();
    assert_eq!(serde_json::from_str::<Value>(&line).unwrap(), json!({"type": "post_liked", "data": {"post_id": 4}}));

    let created = RealtimeEvent::PostCreated(json!({}));
    assert!(render_event(&kinds, &created).unwrap().is_none());
}

#[test]
fn rejected_token_reads_as_expired_session() {
    let expired = CliError::from(ApiError::Status { status: 401, detail: "Could not validate credentials".into() });
    assert!(matches!(expired, CliError::SessionExpired));

    let forbidden = CliError::from(ApiError::Status { status: 403, detail: "Not enough permissions".into() });
    assert!(matches!(forbidden, CliError::Api(ApiError::Status { status: 403, .. })));
}

#[test]
fn with_warning_adds_field_only_when_flagged() {
    let flagged = with_warning(&json!({"id": 1}), Some("careful".into())).unwrap();
    assert_eq!(flagged, json!({"id": 1, "warning": "careful"}));

    let clean = with_warning(&json!({"id": 2}), None).unwrap();
    assert_eq!(clean, json!({"id": 2}));
}
