use super::*;
use crate::page::MemoryPage;

fn alias(name: &str, aliases: &[&str]) -> PageAlias {
    PageAlias {
        name: name.to_string(),
        aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
    }
}

fn document() -> DocumentContext {
    DocumentContext::new("/doc/main").with_session("s-1")
}

fn build(
    params: &ActionParams,
    trigger: Option<&str>,
    aliases: &AliasTable,
    page: &MemoryPage,
) -> RequestEnvelope {
    build_request("/act", params, trigger, aliases, page, &document(), 1_700)
}

#[test]
fn round_trip_request_carries_references_command_and_panels() {
    let page = MemoryPage::new().with_control(ControlSnapshot::scalar("x", "5"));
    let params = ActionParams::new("/act")
        .with_references(["x"])
        .with_panels(["p1"])
        .with_command("p1->refresh");

    let request = build(&params, None, &AliasTable::default(), &page);

    assert!(request.flags.encoded);
    assert_eq!(
        request.body,
        RequestBody::Encoded(vec![
            ("morsic".to_string(), "1700".to_string()),
            ("x".to_string(), "5".to_string()),
            ("req_doc".to_string(), "/doc/main".to_string()),
            ("req_cmd".to_string(), "p1->refresh".to_string()),
            ("req_rsh".to_string(), "p1".to_string()),
        ])
    );
    let encoded = request.body.encode().expect("encoded body");
    assert!(encoded.starts_with("morsic=1700&x=5&"));
    assert!(encoded.contains("req_cmd=p1-%3Erefresh"));
}

#[test]
fn aliases_expand_once_per_control() {
    let page = MemoryPage::new()
        .with_control(ControlSnapshot::scalar("b", "bee"))
        .with_control(ControlSnapshot::scalar("c", "sea"));
    let mut aliases = AliasTable::default();
    aliases.extend([alias("a", &["b", "c"])]);
    let params = ActionParams::new("/act").with_references(["a", "b"]);

    let request = build(&params, None, &aliases, &page);

    assert_eq!(request.body.text_values("b"), vec!["bee".to_string()]);
    assert_eq!(request.body.text_values("c"), vec!["sea".to_string()]);
    assert!(request.body.text_values("a").is_empty());
}

#[test]
fn alias_cycles_terminate() {
    let page = MemoryPage::new().with_control(ControlSnapshot::scalar("leaf", "1"));
    let mut aliases = AliasTable::default();
    aliases.extend([alias("a", &["b", "leaf"]), alias("b", &["a"])]);

    assert_eq!(aliases.expand("a"), vec!["leaf".to_string()]);
    let params = ActionParams::new("/act").with_references(["a"]);
    let request = build(&params, None, &aliases, &page);
    assert_eq!(request.body.text_values("leaf"), vec!["1".to_string()]);
}

#[test]
fn control_kinds_serialize_by_kind() {
    let page = MemoryPage::new()
        .with_control(ControlSnapshot::toggle("agree", false))
        .with_control(ControlSnapshot::new(
            "colors",
            ControlValue::MultiChoice(vec!["red".to_string(), "blue".to_string()]),
        ))
        .with_control(ControlSnapshot::new(
            "size",
            ControlValue::RadioGroup(Some("m".to_string())),
        ))
        .with_control(ControlSnapshot::new("empty", ControlValue::RadioGroup(None)))
        .with_control(ControlSnapshot::button("go"))
        .with_control(ControlSnapshot::scalar("locked", "z").disabled());
    let params = ActionParams::new("/act")
        .with_references(["agree", "colors", "size", "empty", "go", "locked"]);

    let request = build(&params, None, &AliasTable::default(), &page);

    assert_eq!(request.body.text_values("agree"), vec!["false".to_string()]);
    assert_eq!(
        request.body.text_values("colors"),
        vec!["red".to_string(), "blue".to_string()]
    );
    assert_eq!(request.body.text_values("size"), vec!["m".to_string()]);
    assert!(request.body.text_values("empty").is_empty());
    assert!(request.body.text_values("go").is_empty());
    assert!(request.body.text_values("locked").is_empty());
}

#[test]
fn file_reference_forces_multipart_without_cache_buster() {
    let file = FilePayload {
        name: "a.txt".to_string(),
        mime_type: Some("text/plain".to_string()),
        bytes: b"hello".to_vec(),
    };
    let page = MemoryPage::new()
        .with_control(ControlSnapshot::new(
            "upload",
            ControlValue::Files(vec![file.clone()]),
        ))
        .with_control(ControlSnapshot::scalar("note", "n"));
    let params = ActionParams::new("/act").with_references(["note", "upload"]);

    let request = build(&params, None, &AliasTable::default(), &page);

    assert!(!request.flags.encoded);
    let RequestBody::Multipart(parts) = &request.body else {
        panic!("expected multipart body");
    };
    assert!(parts.contains(&("upload".to_string(), FormPart::File(file))));
    assert!(request.body.text_values("morsic").is_empty());
    assert_eq!(request.body.text_values("note"), vec!["n".to_string()]);
    assert!(request.body.encode().is_none());
}

#[test]
fn file_behind_alias_forces_multipart() {
    let page = MemoryPage::new()
        .with_control(ControlSnapshot::new("upload", ControlValue::Files(Vec::new())));
    let mut aliases = AliasTable::default();
    aliases.extend([alias("form", &["upload"])]);

    let params = ActionParams::new("/act").with_references(["form"]);
    let request = build(&params, None, &aliases, &page);

    assert!(matches!(request.body, RequestBody::Multipart(_)));
}

#[test]
fn viewer_replaces_document_path_with_remote_fields() {
    let page = MemoryPage::new();
    let params = ActionParams::new("/act").with_viewer(Some("v7".to_string()));

    let request = build(&params, None, &AliasTable::default(), &page);

    assert!(request.body.text_values("req_doc").is_empty());
    assert_eq!(request.body.text_values("req_rv"), vec!["v7".to_string()]);
    assert_eq!(request.body.text_values("req_rsi"), vec!["s-1".to_string()]);
}

#[test]
fn trigger_fields_follow_confirmation_fields() {
    let page = MemoryPage::new()
        .with_control(ControlSnapshot::scalar("row", "r1"))
        .with_control(ControlSnapshot::scalar("trg_row", "surrogate"))
        .with_control(ControlSnapshot::scalar("other", "o"));
    let mut params = ActionParams::new("/act").with_references(["other", "row"]);
    params.confirm_message = Some("Sure?".to_string());
    params.confirm_icon = Some("2".to_string());
    params.confirm_param = Some("cp".to_string());
    params.send_target = Some("sent".to_string());
    params.request_target_value = true;
    params.validate_action = Some("va1".to_string());

    let request = build(&params, Some("row"), &AliasTable::default(), &page);

    let RequestBody::Encoded(pairs) = &request.body else {
        panic!("expected encoded body");
    };
    let names: Vec<&str> = pairs.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "morsic", "other", "row", "req_cmsg", "req_cmsgicon", "req_cprm", "req_trg", "req_trg",
            "req_trg", "req_doc", "req_va",
        ]
    );
    assert_eq!(
        request.body.text_values("req_trg"),
        vec!["sent".to_string(), "surrogate".to_string(), "r1".to_string()]
    );
    assert_eq!(request.body.text_values("row").len(), 1);
}

#[test]
fn unique_trigger_is_serialized_even_when_already_referenced() {
    let page = MemoryPage::new().with_control(ControlSnapshot::scalar("row", "r1"));
    let mut params = ActionParams::new("/act").with_references(["row"]);
    params.unique_target = true;

    let request = build(&params, Some("row"), &AliasTable::default(), &page);

    assert_eq!(request.body.text_values("row").len(), 2);
}

#[test]
fn document_post_sends_only_the_document_path() {
    let request = RequestEnvelope::document_post("/next", &document(), 5);
    assert_eq!(
        request.body.encode().as_deref(),
        Some("morsic=5&req_doc=%2Fdoc%2Fmain")
    );
    assert!(!request.flags.synchronous);
    assert!(!request.flags.busy);
}
