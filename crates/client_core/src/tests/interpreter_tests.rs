use std::sync::Mutex;

use super::*;
use crate::page::{MemoryPage, PageEvent};
use shared::domain::{ControlSnapshot, PopupSlot};

#[derive(Default)]
struct RecordingHook {
    calls: Mutex<Vec<(String, RenderedRegion, Option<String>)>>,
}

impl RenderHook for RecordingHook {
    fn on_rendered(&self, target: &str, region: RenderedRegion, context: &ScriptContext) {
        self.calls
            .lock()
            .expect("hook lock")
            .push((target.to_string(), region, context.viewer()));
    }
}

struct Harness {
    document: DocumentContext,
    tab_close_id: Option<String>,
    guard: SubmissionGuard,
    aliases: AliasTable,
    save_list: Vec<String>,
    hooks: Vec<Arc<dyn RenderHook>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            document: DocumentContext::new("/"),
            tab_close_id: None,
            guard: SubmissionGuard::new(Some("busy".to_string())),
            aliases: AliasTable::default(),
            save_list: Vec::new(),
            hooks: Vec::new(),
        }
    }

    fn apply(&mut self, page: &MemoryPage, body: &str) -> BatchReport {
        let envelope = ResponseEnvelope::parse(body).expect("envelope");
        apply_envelope(
            envelope,
            ApplyContext {
                page,
                document: &self.document,
                hooks: &self.hooks,
                guard: &mut self.guard,
                aliases: &mut self.aliases,
                save_list: &mut self.save_list,
                hint_panel_id: Some("hint"),
                tab_close_id: self.tab_close_id.as_deref(),
                now_millis: 500,
            },
        )
    }
}

#[test]
fn refresh_panel_replaces_markup_without_running_scripts() {
    let page = MemoryPage::new().with_element("p1", "old");
    let mut harness = Harness::new();

    let report = harness.apply(
        &page,
        r#"{"jsonResp":[{"handler":"refreshPanelHdl","refreshPanels":[{"target":"p1","html":"<b>ok</b>"}]}]}"#,
    );

    assert_eq!(report.applied, 1);
    assert!(report.skipped.is_empty());
    assert_eq!(page.inner_html("p1").as_deref(), Some("<b>ok</b>"));
    assert!(page.scripts().is_empty());
}

#[test]
fn all_markup_lands_before_any_script_runs() {
    let page = MemoryPage::new()
        .with_element("p1", "")
        .with_element("p2", "")
        .with_element("s1", "");
    page.set_script_probe(|page, script| {
        if script == "first()" {
            assert_eq!(page.inner_html("p2").as_deref(), Some("two"));
            assert_eq!(page.inner_html("s1").as_deref(), Some("section"));
        }
    });
    let mut harness = Harness::new();

    harness.apply(
        &page,
        r#"{"jsonResp":[
            {"handler":"refreshPanelHdl","refreshPanels":[
                {"target":"p1","html":"one","script":"first()"},
                {"target":"p2","html":"two","script":"second()"}]},
            {"handler":"refreshSectionHdl","section":{"target":"s1","html":"section","script":"third()"}}
        ]}"#,
    );

    assert_eq!(page.scripts(), vec!["first()", "second()", "third()"]);
    let journal = page.journal();
    let last_markup = journal
        .iter()
        .rposition(|event| matches!(event, PageEvent::Markup { .. }))
        .expect("markup");
    let first_script = journal
        .iter()
        .position(|event| matches!(event, PageEvent::Script { .. }))
        .expect("script");
    assert!(last_markup < first_script);
}

#[test]
fn unknown_and_malformed_items_are_skipped() {
    let page = MemoryPage::new().with_element("p1", "");
    let mut harness = Harness::new();

    let report = harness.apply(
        &page,
        r#"{"jsonResp":[
            {"handler":"evalHdl"},
            {"handler":"downloadHdl"},
            {"handler":"refreshPanelHdl","refreshPanels":[{"target":"p1","html":"kept"}]}
        ]}"#,
    );

    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(page.inner_html("p1").as_deref(), Some("kept"));
}

#[test]
fn missing_target_still_runs_its_script() {
    let page = MemoryPage::new();
    let mut harness = Harness::new();

    harness.apply(
        &page,
        r#"{"jsonResp":[{"handler":"refreshPanelHdl","refreshPanels":[{"target":"nope","html":"x","script":"rig()"}]}]}"#,
    );

    assert_eq!(page.scripts(), vec!["rig()"]);
}

#[test]
fn focus_goes_to_the_last_requested_widget_after_scripts() {
    let page = MemoryPage::new()
        .with_element("p1", "")
        .with_control(ControlSnapshot::scalar("f1", ""))
        .with_control(ControlSnapshot::scalar("f2", ""));
    let mut harness = Harness::new();

    harness.apply(
        &page,
        r#"{"jsonResp":[
            {"handler":"refreshPanelHdl","refreshPanels":[{"target":"p1","html":"a","script":"s()"}],"focusOnWidget":"f1"},
            {"handler":"hidePopupHdl","focusOnWidget":"f2"}
        ]}"#,
    );

    let snapshot = page.snapshot();
    assert_eq!(snapshot.focused.as_deref(), Some("f2"));
    assert!(matches!(snapshot.journal.last(), Some(PageEvent::Focus { id }) if id == "f2"));
}

#[test]
fn page_globals_and_debounce_update_session_state() {
    let page = MemoryPage::new();
    let mut harness = Harness::new();

    let report = harness.apply(
        &page,
        r#"{"jsonResp":[{"handler":"loadContentHdl",
            "pSaveList":["a","b"],
            "clearShortcuts":true,
            "pageNameAliases":[{"pn":"grp","aliases":["a","b"]}],
            "debounceList":["save"],
            "busyIndicator":"spinner",
            "scrollToTop":true}]}"#,
    );

    assert_eq!(harness.save_list, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(harness.aliases.expand("grp"), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(harness.guard.registered_at("save"), Some(500));
    assert_eq!(harness.guard.indicator_id(), Some("spinner"));
    assert_eq!(report.follow_ups, vec![FollowUp::ClearShortcuts]);
    assert!(page.journal().contains(&PageEvent::ScrollToTop));
}

#[test]
fn forward_and_confirmation_come_back_as_follow_ups() {
    let page = MemoryPage::new();
    let mut harness = Harness::new();

    let report = harness.apply(
        &page,
        r#"{"jsonResp":[
            {"handler":"postHdl","postPath":"/next"},
            {"handler":"firePreConfirmHdl","fire":true}
        ]}"#,
    );

    assert_eq!(
        report.follow_ups,
        vec![
            FollowUp::PostPath("/next".to_string()),
            FollowUp::ResolveConfirmation { fire: true },
        ]
    );
}

#[test]
fn hint_writes_the_hint_panel_and_asks_for_a_clear() {
    let page = MemoryPage::new().with_element("hint", "");
    let mut harness = Harness::new();

    let report = harness.apply(
        &page,
        r#"{"jsonResp":[{"handler":"hintUserHdl","hintUserHtml":"Saved"}]}"#,
    );

    assert_eq!(page.inner_html("hint").as_deref(), Some("Saved"));
    assert_eq!(
        report.follow_ups,
        vec![FollowUp::ClearHint {
            panel_id: "hint".to_string()
        }]
    );
}

#[test]
fn validation_notices_mark_existing_controls_only() {
    let page = MemoryPage::new().with_control(ControlSnapshot::scalar("name", ""));
    let mut harness = Harness::new();

    harness.apply(
        &page,
        r#"{"jsonResp":[{"handler":"validationErrorHdl","validationInfo":[
            {"pId":"name","msg":"Required","setFocus":true},
            {"pId":"ghost","msg":"Required"}]}]}"#,
    );

    let snapshot = page.snapshot();
    assert_eq!(snapshot.validation.len(), 1);
    assert_eq!(snapshot.validation[0].message.as_deref(), Some("Required"));
    assert_eq!(snapshot.focused.as_deref(), Some("name"));
}

#[test]
fn render_hooks_see_replaced_regions_with_the_remote_view() {
    let page = MemoryPage::new().with_element("p1", "");
    let hook = Arc::new(RecordingHook::default());
    let mut harness = Harness::new();
    harness.hooks.push(hook.clone());

    harness.apply(
        &page,
        r#"{"remoteView":{"view":"rv1"},"jsonResp":[
            {"handler":"refreshPanelHdl","refreshPanels":[{"target":"p1","html":"x"},{"target":"gone","html":"y"}]},
            {"handler":"showPopupHdl","showPopup":{"html":"<p>pop</p>"}}
        ]}"#,
    );

    let calls = hook.calls.lock().expect("hook lock").clone();
    assert_eq!(
        calls,
        vec![
            ("p1".to_string(), RenderedRegion::Panel, Some("rv1".to_string())),
            (
                "popup".to_string(),
                RenderedRegion::Popup(PopupSlot::Document),
                Some("rv1".to_string())
            ),
        ]
    );
    assert_eq!(page.snapshot().document_popup.as_deref(), Some("<p>pop</p>"));
}

#[test]
fn popup_hooks_use_the_document_popup_ids() {
    let page = MemoryPage::new();
    let hook = Arc::new(RecordingHook::default());
    let mut harness = Harness::new();
    harness.document = DocumentContext::new("/").with_popups("docPopup", "docSysInfo");
    harness.hooks.push(hook.clone());

    harness.apply(
        &page,
        r#"{"jsonResp":[
            {"handler":"showPopupHdl","showPopup":{"html":"a"}},
            {"handler":"showPopupHdl","showSysInfoPopup":{"html":"b"}}
        ]}"#,
    );

    let targets: Vec<String> = hook
        .calls
        .lock()
        .expect("hook lock")
        .iter()
        .map(|(target, _, _)| target.clone())
        .collect();
    assert_eq!(targets, vec!["docPopup", "docSysInfo"]);
}

#[test]
fn close_remote_tab_clicks_the_tab_close_control_only() {
    let page = MemoryPage::new()
        .with_element("tabClose", "")
        .with_element("p1", "old");
    let mut harness = Harness::new();
    harness.tab_close_id = Some("tabClose".to_string());

    let report = harness.apply(
        &page,
        r#"{"jsonResp":[{"handler":"loadContentHdl","closeRemoteTab":true,
            "refreshPanels":[{"target":"p1","html":"new"}],"pSaveList":["x"]}]}"#,
    );

    assert_eq!(report.applied, 1);
    assert!(page.journal().contains(&PageEvent::Click {
        id: "tabClose".to_string()
    }));
    assert_eq!(page.inner_html("p1").as_deref(), Some("old"));
    assert!(harness.save_list.is_empty());
}
