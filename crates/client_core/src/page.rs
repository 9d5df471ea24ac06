//! The page seam: everything the dispatch core reads from or writes to the hosting document.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use shared::{
    domain::{ControlSnapshot, ControlValue, PopupSlot, RenderedRegion},
    protocol::{RemoteView, ValidationNotice},
};

/// Context handed to embedded scripts and render hooks while a batch is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptContext {
    pub remote_view: Option<RemoteView>,
}

impl ScriptContext {
    pub fn viewer(&self) -> Option<String> {
        self.remote_view.as_ref().map(|view| view.view.clone())
    }
}

pub trait PageHost: Send + Sync {
    fn control(&self, id: &str) -> Option<ControlSnapshot>;
    fn contains(&self, id: &str) -> bool;
    fn set_hidden_value(&self, name: &str, value: &str);
    fn set_disabled(&self, id: &str, disabled: bool);
    /// Returns false when no element with `target` exists.
    fn set_inner_html(&self, target: &str, html: &str) -> bool;
    fn run_script(&self, script: &str, context: &ScriptContext);
    fn show_popup(&self, slot: PopupSlot, html: &str);
    fn hide_popup(&self, slot: PopupSlot);
    fn focus(&self, id: &str);
    fn navigate(&self, url: &str);
    fn open_window(&self, url: &str);
    fn download(&self, url: &str);
    fn show_validation(&self, notice: &ValidationNotice);
    fn scroll_to_top(&self);
    /// Fires a click on `id`; a missing element is ignored.
    fn click(&self, id: &str);
    fn set_busy_indicator(&self, id: &str, visible: bool);
    fn alert(&self, message: &str);
}

/// Lets a widget re-rig itself against markup the interpreter just inserted.
pub trait RenderHook: Send + Sync {
    fn on_rendered(&self, target: &str, region: RenderedRegion, context: &ScriptContext);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PageEvent {
    Markup { target: String },
    Script { source: String, viewer: Option<String> },
    PopupShown { slot: PopupSlot },
    PopupHidden { slot: PopupSlot },
    Focus { id: String },
    Disabled { id: String, disabled: bool },
    BusyIndicator { id: String, visible: bool },
    Validation { control_id: String },
    Navigate { url: String },
    OpenWindow { url: String },
    Download { url: String },
    ScrollToTop,
    Click { id: String },
    Alert { message: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageSnapshot {
    pub controls: BTreeMap<String, ControlSnapshot>,
    pub elements: BTreeMap<String, String>,
    pub document_popup: Option<String>,
    pub system_popup: Option<String>,
    pub focused: Option<String>,
    pub busy_indicator_visible: Option<String>,
    pub location: Option<String>,
    pub validation: Vec<ValidationNotice>,
    pub alerts: Vec<String>,
    pub journal: Vec<PageEvent>,
}

type ScriptProbe = Arc<dyn Fn(&MemoryPage, &str) + Send + Sync>;

/// In-process page used by the console driver and by tests.
#[derive(Default)]
pub struct MemoryPage {
    state: Mutex<PageSnapshot>,
    script_probe: Mutex<Option<ScriptProbe>>,
}

impl MemoryPage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PageSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_control(self, control: ControlSnapshot) -> Self {
        self.insert_control(control);
        self
    }

    pub fn with_element(self, id: impl Into<String>, html: impl Into<String>) -> Self {
        self.insert_element(id, html);
        self
    }

    pub fn insert_control(&self, control: ControlSnapshot) {
        self.state().controls.insert(control.id.clone(), control);
    }

    pub fn insert_element(&self, id: impl Into<String>, html: impl Into<String>) {
        self.state().elements.insert(id.into(), html.into());
    }

    pub fn remove_element(&self, id: &str) {
        self.state().elements.remove(id);
    }

    /// Called after a script has been journaled, with no page lock held.
    pub fn set_script_probe(&self, probe: impl Fn(&MemoryPage, &str) + Send + Sync + 'static) {
        *self
            .script_probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(probe));
    }

    pub fn inner_html(&self, id: &str) -> Option<String> {
        self.state().elements.get(id).cloned()
    }

    pub fn is_disabled(&self, id: &str) -> Option<bool> {
        self.state().controls.get(id).map(|control| control.disabled)
    }

    pub fn busy_indicator_visible(&self) -> bool {
        self.state().busy_indicator_visible.is_some()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.state().alerts.clone()
    }

    pub fn journal(&self) -> Vec<PageEvent> {
        self.state().journal.clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.state()
            .journal
            .iter()
            .filter_map(|event| match event {
                PageEvent::Script { source, .. } => Some(source.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn snapshot(&self) -> PageSnapshot {
        self.state().clone()
    }
}

impl PageHost for MemoryPage {
    fn control(&self, id: &str) -> Option<ControlSnapshot> {
        self.state().controls.get(id).cloned()
    }

    fn contains(&self, id: &str) -> bool {
        let state = self.state();
        state.elements.contains_key(id) || state.controls.contains_key(id)
    }

    fn set_hidden_value(&self, name: &str, value: &str) {
        if let Some(control) = self.state().controls.get_mut(name) {
            if let ControlValue::Scalar(current) = &mut control.value {
                *current = value.to_string();
            }
        }
    }

    fn set_disabled(&self, id: &str, disabled: bool) {
        let mut state = self.state();
        if let Some(control) = state.controls.get_mut(id) {
            control.disabled = disabled;
            state.journal.push(PageEvent::Disabled {
                id: id.to_string(),
                disabled,
            });
        }
    }

    fn set_inner_html(&self, target: &str, html: &str) -> bool {
        let mut state = self.state();
        let Some(element) = state.elements.get_mut(target) else {
            return false;
        };
        *element = html.to_string();
        state.journal.push(PageEvent::Markup {
            target: target.to_string(),
        });
        true
    }

    fn run_script(&self, script: &str, context: &ScriptContext) {
        self.state().journal.push(PageEvent::Script {
            source: script.to_string(),
            viewer: context.viewer(),
        });
        let probe = self
            .script_probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(probe) = probe {
            probe(self, script);
        }
    }

    fn show_popup(&self, slot: PopupSlot, html: &str) {
        let mut state = self.state();
        match slot {
            PopupSlot::Document => state.document_popup = Some(html.to_string()),
            PopupSlot::System => state.system_popup = Some(html.to_string()),
        }
        state.journal.push(PageEvent::PopupShown { slot });
    }

    fn hide_popup(&self, slot: PopupSlot) {
        let mut state = self.state();
        let previous = match slot {
            PopupSlot::Document => state.document_popup.take(),
            PopupSlot::System => state.system_popup.take(),
        };
        if previous.is_some() {
            state.journal.push(PageEvent::PopupHidden { slot });
        }
    }

    fn focus(&self, id: &str) {
        let mut state = self.state();
        state.focused = Some(id.to_string());
        state.journal.push(PageEvent::Focus { id: id.to_string() });
    }

    fn navigate(&self, url: &str) {
        let mut state = self.state();
        state.location = Some(url.to_string());
        state.journal.push(PageEvent::Navigate {
            url: url.to_string(),
        });
    }

    fn open_window(&self, url: &str) {
        self.state().journal.push(PageEvent::OpenWindow {
            url: url.to_string(),
        });
    }

    fn download(&self, url: &str) {
        self.state().journal.push(PageEvent::Download {
            url: url.to_string(),
        });
    }

    fn show_validation(&self, notice: &ValidationNotice) {
        let mut state = self.state();
        state.validation.push(notice.clone());
        state.journal.push(PageEvent::Validation {
            control_id: notice.control_id.clone(),
        });
    }

    fn scroll_to_top(&self) {
        self.state().journal.push(PageEvent::ScrollToTop);
    }

    fn click(&self, id: &str) {
        let mut state = self.state();
        if state.elements.contains_key(id) || state.controls.contains_key(id) {
            state.journal.push(PageEvent::Click { id: id.to_string() });
        }
    }

    fn set_busy_indicator(&self, id: &str, visible: bool) {
        let mut state = self.state();
        state.busy_indicator_visible = visible.then(|| id.to_string());
        state.journal.push(PageEvent::BusyIndicator {
            id: id.to_string(),
            visible,
        });
    }

    fn alert(&self, message: &str) {
        let mut state = self.state();
        state.alerts.push(message.to_string());
        state.journal.push(PageEvent::Alert {
            message: message.to_string(),
        });
    }
}
