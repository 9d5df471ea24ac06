//! Serializes an action plus the page's current control values into a request.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shared::{
    action::ActionParams,
    domain::{ControlSnapshot, ControlValue, FilePayload, PopupSlot},
    protocol::{
        PageAlias, FIELD_CACHE_BUSTER, FIELD_COMMAND, FIELD_CONFIRM_ICON, FIELD_CONFIRM_MESSAGE,
        FIELD_CONFIRM_PARAM, FIELD_DOCUMENT, FIELD_REFRESH_PANEL, FIELD_REMOTE_SESSION,
        FIELD_REMOTE_VIEW, FIELD_TARGET, FIELD_VALIDATE_ACTION,
    },
};

use crate::page::PageHost;

/// Prefix of the hidden companion control whose value is sent as the trigger value.
pub const TARGET_SURROGATE_PREFIX: &str = "trg_";

/// Where requests not scoped to a remote view are addressed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContext {
    pub path: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub popup_id: Option<String>,
    #[serde(default)]
    pub sys_info_id: Option<String>,
}

impl DocumentContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_popups(
        mut self,
        popup_id: impl Into<String>,
        sys_info_id: impl Into<String>,
    ) -> Self {
        self.popup_id = Some(popup_id.into());
        self.sys_info_id = Some(sys_info_id.into());
        self
    }

    /// Element id hosting the popup in `slot`, falling back to `popup`/`sysinfo`.
    pub fn popup_target(&self, slot: PopupSlot) -> &str {
        match slot {
            PopupSlot::Document => self.popup_id.as_deref().unwrap_or("popup"),
            PopupSlot::System => self.sys_info_id.as_deref().unwrap_or("sysinfo"),
        }
    }
}

/// Page-name aliases: a name that maps to other names is never serialized itself.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: HashMap<String, Vec<String>>,
}

impl AliasTable {
    pub fn extend(&mut self, entries: impl IntoIterator<Item = PageAlias>) {
        for entry in entries {
            self.entries.insert(entry.name, entry.aliases);
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Appends the concrete names `name` stands for, depth first.
    pub fn expand_into(&self, name: &str, out: &mut Vec<String>) {
        let mut visiting = HashSet::new();
        self.expand_inner(name, out, &mut visiting);
    }

    fn expand_inner<'a>(
        &'a self,
        name: &'a str,
        out: &mut Vec<String>,
        visiting: &mut HashSet<&'a str>,
    ) {
        match self.entries.get(name) {
            Some(aliases) => {
                if !visiting.insert(name) {
                    return;
                }
                for alias in aliases {
                    self.expand_inner(alias, out, visiting);
                }
                visiting.remove(name);
            }
            None => out.push(name.to_string()),
        }
    }

    pub fn expand(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.expand_into(name, &mut out);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    Text(String),
    File(FilePayload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Encoded(Vec<(String, String)>),
    Multipart(Vec<(String, FormPart)>),
}

impl RequestBody {
    pub fn text_values(&self, name: &str) -> Vec<String> {
        match self {
            RequestBody::Encoded(pairs) => pairs
                .iter()
                .filter(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .collect(),
            RequestBody::Multipart(parts) => parts
                .iter()
                .filter_map(|(key, part)| match part {
                    FormPart::Text(value) if key == name => Some(value.clone()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn encode(&self) -> Option<String> {
        match self {
            RequestBody::Encoded(pairs) => Some(
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter())
                    .finish(),
            ),
            RequestBody::Multipart(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    pub encoded: bool,
    pub synchronous: bool,
    pub busy: bool,
    pub debounced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub url: String,
    pub body: RequestBody,
    pub flags: RequestFlags,
}

impl RequestEnvelope {
    /// Bare document post: only `req_doc`, never synchronous or busy-tracked.
    pub fn document_post(
        url: impl Into<String>,
        document: &DocumentContext,
        now_millis: i64,
    ) -> Self {
        Self {
            url: url.into(),
            body: RequestBody::Encoded(vec![
                (FIELD_CACHE_BUSTER.to_string(), now_millis.to_string()),
                (FIELD_DOCUMENT.to_string(), document.path.clone()),
            ]),
            flags: RequestFlags {
                encoded: true,
                ..RequestFlags::default()
            },
        }
    }
}

struct PartsBuilder<'a> {
    page: &'a dyn PageHost,
    aliases: &'a AliasTable,
    built: HashSet<String>,
    parts: Vec<(String, FormPart)>,
}

impl<'a> PartsBuilder<'a> {
    fn text(&mut self, name: &str, value: impl Into<String>) {
        self.parts
            .push((name.to_string(), FormPart::Text(value.into())));
    }

    fn named(&mut self, name: &str) {
        for id in self.aliases.expand(name) {
            if id.is_empty() || !self.built.insert(id.clone()) {
                continue;
            }
            if let Some(control) = self.page.control(&id) {
                self.control(&control);
            }
        }
    }

    fn control(&mut self, control: &ControlSnapshot) {
        if control.disabled {
            return;
        }
        let id = control.id.as_str();
        match &control.value {
            ControlValue::Button => {}
            ControlValue::Scalar(value) => self.text(id, value.clone()),
            ControlValue::Toggle(checked) => self.text(id, checked.to_string()),
            ControlValue::MultiChoice(values) | ControlValue::CheckGroup(values) => {
                for value in values {
                    self.text(id, value.clone());
                }
            }
            ControlValue::RadioGroup(value) => {
                if let Some(value) = value {
                    self.text(id, value.clone());
                }
            }
            ControlValue::Files(files) => {
                for file in files {
                    self.parts
                        .push((id.to_string(), FormPart::File(file.clone())));
                }
            }
        }
    }
}

/// True when the trigger or any referenced name (directly or through one alias level) is a file control.
pub fn requires_multipart(
    trigger: Option<&str>,
    references: &[String],
    aliases: &AliasTable,
    page: &dyn PageHost,
) -> bool {
    let is_file = |id: &str| {
        page.control(id)
            .map(|control| control.value.is_file())
            .unwrap_or(false)
    };
    if trigger.is_some_and(is_file) {
        return true;
    }
    references.iter().any(|id| {
        is_file(id)
            || aliases
                .get(id)
                .is_some_and(|names| names.iter().any(|name| is_file(name)))
    })
}

pub fn build_request(
    url: impl Into<String>,
    params: &ActionParams,
    trigger: Option<&str>,
    aliases: &AliasTable,
    page: &dyn PageHost,
    document: &DocumentContext,
    now_millis: i64,
) -> RequestEnvelope {
    let mut builder = PartsBuilder {
        page,
        aliases,
        built: HashSet::new(),
        parts: Vec::new(),
    };

    for name in &params.references {
        builder.named(name);
    }

    if let Some(message) = &params.confirm_message {
        builder.text(FIELD_CONFIRM_MESSAGE, message.clone());
        builder.text(
            FIELD_CONFIRM_ICON,
            params.confirm_icon.clone().unwrap_or_default(),
        );
    }
    if let Some(param) = params.confirm_param.as_deref().filter(|p| !p.is_empty()) {
        builder.text(FIELD_CONFIRM_PARAM, param);
    }
    if let Some(target) = params.send_target.as_deref().filter(|t| !t.is_empty()) {
        builder.text(FIELD_TARGET, target);
    }

    if let Some(trigger_id) = trigger {
        if params.unique_target {
            if let Some(control) = page.control(trigger_id) {
                builder.control(&control);
            }
        } else {
            builder.named(trigger_id);
        }

        let surrogate = format!("{TARGET_SURROGATE_PREFIX}{trigger_id}");
        if let Some(value) = page
            .control(&surrogate)
            .and_then(|control| control.value.scalar().map(str::to_string))
        {
            builder.text(FIELD_TARGET, value);
        }

        if params.request_target_value {
            let value = page
                .control(trigger_id)
                .and_then(|control| control.value.scalar().map(str::to_string))
                .unwrap_or_default();
            builder.text(FIELD_TARGET, value);
        }
    }

    match params.viewer.as_deref().filter(|v| !v.is_empty()) {
        Some(viewer) => {
            builder.text(FIELD_REMOTE_VIEW, viewer);
            builder.text(
                FIELD_REMOTE_SESSION,
                document.session_id.clone().unwrap_or_default(),
            );
        }
        None => builder.text(FIELD_DOCUMENT, document.path.clone()),
    }
    if let Some(action) = params.validate_action.as_deref().filter(|a| !a.is_empty()) {
        builder.text(FIELD_VALIDATE_ACTION, action);
    }
    if let Some(command) = params.command.as_deref().filter(|c| !c.is_empty()) {
        builder.text(FIELD_COMMAND, command);
    }
    for panel in &params.panels {
        builder.text(FIELD_REFRESH_PANEL, panel.clone());
    }

    let multipart = requires_multipart(trigger, &params.references, aliases, page)
        || builder
            .parts
            .iter()
            .any(|(_, part)| matches!(part, FormPart::File(_)));
    let flags = RequestFlags {
        encoded: !multipart,
        synchronous: params.synchronous,
        busy: params.busy,
        debounced: params.debounced,
    };
    let body = if multipart {
        RequestBody::Multipart(builder.parts)
    } else {
        let mut pairs = Vec::with_capacity(builder.parts.len() + 1);
        pairs.push((FIELD_CACHE_BUSTER.to_string(), now_millis.to_string()));
        pairs.extend(builder.parts.into_iter().filter_map(|(name, part)| match part {
            FormPart::Text(value) => Some((name, value)),
            FormPart::File(_) => None,
        }));
        RequestBody::Encoded(pairs)
    };

    RequestEnvelope {
        url: url.into(),
        body,
        flags,
    }
}

#[cfg(test)]
#[path = "tests/params_tests.rs"]
mod tests;
