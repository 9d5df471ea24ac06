use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{domain::PopupSlot, error::ProtocolError};

pub const FIELD_CACHE_BUSTER: &str = "morsic";
pub const FIELD_DOCUMENT: &str = "req_doc";
pub const FIELD_REMOTE_VIEW: &str = "req_rv";
pub const FIELD_REMOTE_SESSION: &str = "req_rsi";
pub const FIELD_COMMAND: &str = "req_cmd";
pub const FIELD_REFRESH_PANEL: &str = "req_rsh";
pub const FIELD_TARGET: &str = "req_trg";
pub const FIELD_VALIDATE_ACTION: &str = "req_va";
pub const FIELD_CONFIRM_PARAM: &str = "req_cprm";
pub const FIELD_CONFIRM_MESSAGE: &str = "req_cmsg";
pub const FIELD_CONFIRM_ICON: &str = "req_cmsgicon";

/// Path placeholder a post operation uses to mean "the current content-open path".
pub const CONTENT_OPEN_PATH: &str = "content_open";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteView {
    pub view: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_view: Option<RemoteView>,
    #[serde(default)]
    pub json_resp: Vec<Value>,
}

impl ResponseEnvelope {
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(body).map_err(ProtocolError::InvalidJson)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub target: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAlias {
    #[serde(rename = "pn")]
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationNotice {
    #[serde(rename = "pId")]
    pub control_id: String,
    #[serde(rename = "pBrdId", default)]
    pub border_id: Option<String>,
    #[serde(rename = "pNotfId", default)]
    pub notice_id: Option<String>,
    #[serde(rename = "borderStyle", default)]
    pub border_style: Option<String>,
    #[serde(rename = "msg", default)]
    pub message: Option<String>,
    #[serde(rename = "setFocus", default)]
    pub set_focus: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOperation {
    ReplacePanel(Fragment),
    ReplaceSection(Fragment),
    ShowPopup {
        slot: PopupSlot,
        html: String,
        script: Option<String>,
    },
    HidePopup {
        slot: PopupSlot,
    },
    Redirect {
        url: String,
    },
    OpenWindow {
        url: String,
    },
    Download {
        url: String,
    },
    HintUser {
        html: String,
    },
    ValidationErrors {
        items: Vec<ValidationNotice>,
    },
    RegisterDebounce {
        ids: Vec<String>,
        clear: bool,
    },
    SetPageAliases {
        entries: Vec<PageAlias>,
    },
    SetSaveList {
        ids: Vec<String>,
    },
    ClearShortcuts,
    SetBusyIndicator {
        id: String,
    },
    ScrollToTop,
    Forward {
        path: String,
    },
    FirePreConfirm {
        fire: bool,
    },
    /// Close the content tab hosting a remote document.
    CloseRemoteTab,
}

impl ResponseOperation {
    pub fn script(&self) -> Option<&str> {
        match self {
            ResponseOperation::ReplacePanel(fragment)
            | ResponseOperation::ReplaceSection(fragment) => fragment.script.as_deref(),
            ResponseOperation::ShowPopup { script, .. } => script.as_deref(),
            _ => None,
        }
    }
}

type Decoder = fn(Value) -> Result<Vec<ResponseOperation>, serde_json::Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    CommandPost,
    DocView,
    Download,
    Forward,
    FirePreConfirm,
    HidePopup,
    HintUser,
    LoadContent,
    OpenWindow,
    Post,
    RefreshMenu,
    RefreshPanel,
    RefreshSection,
    ShowPopup,
    ValidationError,
}

const HANDLER_NAMES: &[(&str, HandlerKind)] = &[
    ("commandPostHdl", HandlerKind::CommandPost),
    ("docViewHdl", HandlerKind::DocView),
    ("downloadHdl", HandlerKind::Download),
    ("forwardHdl", HandlerKind::Forward),
    ("firePreConfirmHdl", HandlerKind::FirePreConfirm),
    ("hidePopupHdl", HandlerKind::HidePopup),
    ("hintUserHdl", HandlerKind::HintUser),
    ("loadContentHdl", HandlerKind::LoadContent),
    ("openWindowHdl", HandlerKind::OpenWindow),
    ("postHdl", HandlerKind::Post),
    ("refreshMenuHdl", HandlerKind::RefreshMenu),
    ("refreshPanelHdl", HandlerKind::RefreshPanel),
    ("refreshSectionHdl", HandlerKind::RefreshSection),
    ("showPopupHdl", HandlerKind::ShowPopup),
    ("validationErrorHdl", HandlerKind::ValidationError),
];

impl HandlerKind {
    pub fn from_name(name: &str) -> Option<Self> {
        HANDLER_NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, kind)| *kind)
    }

    pub fn name(self) -> &'static str {
        HANDLER_NAMES
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    fn decoder(self) -> Decoder {
        match self {
            HandlerKind::CommandPost | HandlerKind::Post => decode_post,
            HandlerKind::DocView => decode_doc_view,
            HandlerKind::Download => decode_download,
            HandlerKind::Forward => decode_forward,
            HandlerKind::FirePreConfirm => decode_fire_pre_confirm,
            HandlerKind::HidePopup => decode_hide_popup,
            HandlerKind::HintUser => decode_hint_user,
            HandlerKind::LoadContent => decode_load_content,
            HandlerKind::OpenWindow => decode_open_window,
            HandlerKind::RefreshMenu => decode_refresh_menu,
            HandlerKind::RefreshPanel => decode_refresh_panel,
            HandlerKind::RefreshSection => decode_refresh_section,
            HandlerKind::ShowPopup => decode_show_popup,
            HandlerKind::ValidationError => decode_validation_error,
        }
    }

    pub fn decode(self, item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
        (self.decoder())(item)
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations decoded from one `jsonResp` entry, plus the widget it asks to focus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedItem {
    pub handler: HandlerKind,
    pub operations: Vec<ResponseOperation>,
    pub focus: Option<String>,
}

pub fn decode_item(index: usize, item: Value) -> Result<DecodedItem, ProtocolError> {
    let name = item
        .get("handler")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingHandler { index })?
        .to_string();
    let handler =
        HandlerKind::from_name(&name).ok_or_else(|| ProtocolError::UnknownHandler(name.clone()))?;
    let focus = item
        .get("focusOnWidget")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let operations = handler
        .decode(item)
        .map_err(|source| ProtocolError::MalformedOperation {
            handler: name,
            source,
        })?;
    Ok(DecodedItem {
        handler,
        operations,
        focus,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageGlobals {
    #[serde(default)]
    p_save_list: Option<Vec<String>>,
    #[serde(default)]
    clear_shortcuts: bool,
    #[serde(default)]
    page_name_aliases: Vec<PageAlias>,
}

impl PageGlobals {
    fn push_into(self, operations: &mut Vec<ResponseOperation>) {
        if let Some(ids) = self.p_save_list {
            operations.push(ResponseOperation::SetSaveList { ids });
        }
        if self.clear_shortcuts {
            operations.push(ResponseOperation::ClearShortcuts);
        }
        if !self.page_name_aliases.is_empty() {
            operations.push(ResponseOperation::SetPageAliases {
                entries: self.page_name_aliases,
            });
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebounceFields {
    #[serde(default)]
    debounce_list: Option<Vec<String>>,
    #[serde(default)]
    debounce_clear: bool,
}

impl DebounceFields {
    fn push_into(self, operations: &mut Vec<ResponseOperation>) {
        if let Some(ids) = self.debounce_list {
            operations.push(ResponseOperation::RegisterDebounce {
                ids,
                clear: self.debounce_clear,
            });
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Markup {
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    script: Option<String>,
}

fn parse<T: DeserializeOwned>(item: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(item)
}

fn push_panels(panels: Vec<Fragment>, operations: &mut Vec<ResponseOperation>) {
    operations.extend(panels.into_iter().map(ResponseOperation::ReplacePanel));
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPanelPayload {
    #[serde(default)]
    refresh_panels: Vec<Fragment>,
    #[serde(flatten)]
    globals: PageGlobals,
    #[serde(flatten)]
    debounce: DebounceFields,
}

fn decode_refresh_panel(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: RefreshPanelPayload = parse(item)?;
    let mut operations = Vec::new();
    payload.globals.push_into(&mut operations);
    push_panels(payload.refresh_panels, &mut operations);
    payload.debounce.push_into(&mut operations);
    Ok(operations)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshMenuPayload {
    #[serde(default)]
    refresh_panels: Vec<Fragment>,
}

fn decode_refresh_menu(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: RefreshMenuPayload = parse(item)?;
    let mut operations = Vec::new();
    push_panels(payload.refresh_panels, &mut operations);
    Ok(operations)
}

#[derive(Deserialize)]
struct RefreshSectionPayload {
    #[serde(default)]
    section: Option<Fragment>,
    #[serde(flatten)]
    debounce: DebounceFields,
}

fn decode_refresh_section(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: RefreshSectionPayload = parse(item)?;
    let mut operations = Vec::new();
    if let Some(section) = payload.section {
        operations.push(ResponseOperation::ReplaceSection(section));
    }
    payload.debounce.push_into(&mut operations);
    Ok(operations)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadContentPayload {
    #[serde(default)]
    close_remote_tab: bool,
    #[serde(default)]
    refresh_panels: Vec<Fragment>,
    #[serde(default)]
    busy_indicator: Option<String>,
    #[serde(default)]
    scroll_to_top: bool,
    #[serde(flatten)]
    globals: PageGlobals,
    #[serde(flatten)]
    debounce: DebounceFields,
}

fn decode_load_content(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: LoadContentPayload = parse(item)?;
    if payload.close_remote_tab {
        return Ok(vec![ResponseOperation::CloseRemoteTab]);
    }
    let mut operations = Vec::new();
    payload.globals.push_into(&mut operations);
    push_panels(payload.refresh_panels, &mut operations);
    payload.debounce.push_into(&mut operations);
    if let Some(id) = payload.busy_indicator.filter(|id| !id.is_empty()) {
        operations.push(ResponseOperation::SetBusyIndicator { id });
    }
    if payload.scroll_to_top {
        operations.push(ResponseOperation::ScrollToTop);
    }
    Ok(operations)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowPopupPayload {
    #[serde(default)]
    show_sys_info_popup: Option<Markup>,
    #[serde(default)]
    show_popup: Option<Markup>,
    #[serde(flatten)]
    globals: PageGlobals,
}

fn decode_show_popup(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: ShowPopupPayload = parse(item)?;
    let mut operations = Vec::new();
    payload.globals.push_into(&mut operations);
    let (slot, markup) = match payload.show_sys_info_popup {
        Some(markup) => (PopupSlot::System, Some(markup)),
        None => (PopupSlot::Document, payload.show_popup),
    };
    if let Some(Markup {
        html: Some(html),
        script,
    }) = markup
    {
        if !html.is_empty() {
            operations.push(ResponseOperation::ShowPopup { slot, html, script });
        }
    }
    Ok(operations)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HidePopupPayload {
    #[serde(default)]
    hide_sys_info_popup: bool,
}

fn decode_hide_popup(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: HidePopupPayload = parse(item)?;
    let slot = if payload.hide_sys_info_popup {
        PopupSlot::System
    } else {
        PopupSlot::Document
    };
    Ok(vec![ResponseOperation::HidePopup { slot }])
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostPayload {
    #[serde(default)]
    post_path: Option<String>,
}

fn decode_post(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: PostPayload = parse(item)?;
    Ok(payload
        .post_path
        .filter(|path| !path.is_empty())
        .map(|path| ResponseOperation::Forward { path })
        .into_iter()
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocViewPayload {
    remote_target: String,
    doc_view: Markup,
}

fn decode_doc_view(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: DocViewPayload = parse(item)?;
    Ok(vec![ResponseOperation::ReplacePanel(Fragment {
        target: payload.remote_target,
        html: payload.doc_view.html,
        script: payload.doc_view.script,
    })])
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadPayload {
    download_path: String,
}

fn decode_download(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: DownloadPayload = parse(item)?;
    Ok(vec![ResponseOperation::Download {
        url: payload.download_path,
    }])
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForwardPayload {
    load_document: String,
}

fn decode_forward(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: ForwardPayload = parse(item)?;
    Ok(vec![ResponseOperation::Redirect {
        url: payload.load_document,
    }])
}

#[derive(Deserialize)]
struct FirePreConfirmPayload {
    #[serde(default)]
    fire: bool,
}

fn decode_fire_pre_confirm(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: FirePreConfirmPayload = parse(item)?;
    Ok(vec![ResponseOperation::FirePreConfirm { fire: payload.fire }])
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HintUserPayload {
    #[serde(default)]
    hint_user_html: Option<String>,
}

fn decode_hint_user(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: HintUserPayload = parse(item)?;
    Ok(payload
        .hint_user_html
        .filter(|html| !html.is_empty())
        .map(|html| ResponseOperation::HintUser { html })
        .into_iter()
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenWindowPayload {
    open_window: String,
    #[serde(default)]
    attachment: bool,
}

fn decode_open_window(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: OpenWindowPayload = parse(item)?;
    let url = payload.open_window;
    Ok(vec![if payload.attachment {
        ResponseOperation::Redirect { url }
    } else {
        ResponseOperation::OpenWindow { url }
    }])
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidationErrorPayload {
    #[serde(default)]
    validation_info: Vec<ValidationNotice>,
}

fn decode_validation_error(item: Value) -> Result<Vec<ResponseOperation>, serde_json::Error> {
    let payload: ValidationErrorPayload = parse(item)?;
    Ok(vec![ResponseOperation::ValidationErrors {
        items: payload.validation_info,
    }])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn every_registered_name_round_trips_through_the_registry() {
        for (name, kind) in HANDLER_NAMES {
            assert_eq!(HandlerKind::from_name(name), Some(*kind));
            assert_eq!(kind.name(), *name);
        }
        assert_eq!(HandlerKind::from_name("evalHdl"), None);
    }

    #[test]
    fn refresh_panel_orders_globals_then_panels_then_debounce() {
        let item = json!({
            "handler": "refreshPanelHdl",
            "pageNameAliases": [{ "pn": "a", "aliases": ["b", "c"] }],
            "refreshPanels": [{ "target": "p1", "html": "<b>ok</b>", "script": "rig()" }],
            "debounceList": ["btn"],
            "debounceClear": true,
            "focusOnWidget": "f1"
        });

        let decoded = decode_item(0, item).expect("decode");
        assert_eq!(decoded.handler, HandlerKind::RefreshPanel);
        assert_eq!(decoded.focus.as_deref(), Some("f1"));
        assert_eq!(
            decoded.operations,
            vec![
                ResponseOperation::SetPageAliases {
                    entries: vec![PageAlias {
                        name: "a".to_string(),
                        aliases: vec!["b".to_string(), "c".to_string()],
                    }],
                },
                ResponseOperation::ReplacePanel(Fragment {
                    target: "p1".to_string(),
                    html: Some("<b>ok</b>".to_string()),
                    script: Some("rig()".to_string()),
                }),
                ResponseOperation::RegisterDebounce {
                    ids: vec!["btn".to_string()],
                    clear: true,
                },
            ]
        );
    }

    #[test]
    fn close_remote_tab_skips_the_rest_of_load_content() {
        let item = json!({
            "handler": "loadContentHdl",
            "closeRemoteTab": true,
            "pSaveList": ["a"],
            "refreshPanels": [{ "target": "p1", "html": "x" }],
            "debounceList": ["btn"],
            "scrollToTop": true
        });

        let decoded = decode_item(0, item).expect("decode");
        assert_eq!(decoded.operations, vec![ResponseOperation::CloseRemoteTab]);
    }

    #[test]
    fn show_popup_prefers_the_system_slot() {
        let item = json!({
            "handler": "showPopupHdl",
            "showSysInfoPopup": { "html": "<p>sys</p>" },
            "showPopup": { "html": "<p>doc</p>" }
        });

        let decoded = decode_item(0, item).expect("decode");
        assert_eq!(
            decoded.operations,
            vec![ResponseOperation::ShowPopup {
                slot: PopupSlot::System,
                html: "<p>sys</p>".to_string(),
                script: None,
            }]
        );
    }

    #[test]
    fn open_window_attachment_becomes_a_redirect() {
        let decoded = decode_item(
            0,
            json!({ "handler": "openWindowHdl", "openWindow": "/file", "attachment": true }),
        )
        .expect("decode");
        assert_eq!(
            decoded.operations,
            vec![ResponseOperation::Redirect {
                url: "/file".to_string()
            }]
        );
    }

    #[test]
    fn unknown_and_missing_handlers_are_protocol_errors() {
        let err = decode_item(3, json!({ "handler": "evalHdl" })).expect_err("unknown");
        assert!(matches!(err, ProtocolError::UnknownHandler(name) if name == "evalHdl"));

        let err = decode_item(3, json!({ "target": "p1" })).expect_err("missing");
        assert!(matches!(err, ProtocolError::MissingHandler { index: 3 }));
    }

    #[test]
    fn malformed_payload_names_its_handler() {
        let err = decode_item(0, json!({ "handler": "downloadHdl" })).expect_err("malformed");
        assert!(
            matches!(err, ProtocolError::MalformedOperation { ref handler, .. } if handler == "downloadHdl")
        );
    }

    #[test]
    fn envelope_keeps_remote_view_and_item_order() {
        let envelope = ResponseEnvelope::parse(
            r#"{"remoteView":{"view":"v9"},"jsonResp":[{"handler":"postHdl"},{"handler":"hidePopupHdl"}]}"#,
        )
        .expect("parse");
        assert_eq!(
            envelope.remote_view,
            Some(RemoteView {
                view: "v9".to_string()
            })
        );
        assert_eq!(envelope.json_resp.len(), 2);
        assert!(ResponseEnvelope::parse("<html>").is_err());
    }
}
