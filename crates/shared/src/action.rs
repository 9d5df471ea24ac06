use serde::{Deserialize, Serialize};

use crate::domain::Modifiers;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub message: String,
    #[serde(default)]
    pub icon_index: Option<String>,
    /// Endpoint that renders the confirmation dialog.
    pub url: String,
}

/// Describes one wireable action. Built by widget rigging, read by the dispatch core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionParams {
    pub url: Option<String>,
    pub command: Option<String>,
    pub panels: Vec<String>,
    pub references: Vec<String>,
    pub hidden_values: Vec<String>,
    pub synchronous: bool,
    pub busy: bool,
    pub debounced: bool,
    pub confirm: Option<Confirmation>,
    pub confirm_message: Option<String>,
    pub confirm_icon: Option<String>,
    pub confirm_param: Option<String>,
    pub viewer: Option<String>,
    pub validate_action: Option<String>,
    pub send_target: Option<String>,
    pub request_target_value: bool,
    pub unique_target: bool,
    pub auto_call: bool,
    pub command_url: Option<String>,
    pub target_panel: Option<String>,
    pub target_command: Option<String>,
    pub refresh_panels: Vec<String>,
}

impl ActionParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_panels<I, S>(mut self, panels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.panels = panels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_references<I, S>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = references.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_viewer(mut self, viewer: Option<String>) -> Self {
        self.viewer = viewer;
        self
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirm = Some(confirmation);
        self
    }

    pub fn synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }

    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    pub fn debounced(mut self) -> Self {
        self.debounced = true;
        self
    }

    pub fn auto(mut self) -> Self {
        self.auto_call = true;
        self
    }

    /// Panel-scoped command in the `panel->command` form the server routes on.
    pub fn panel_command(panel: &str, command: &str) -> String {
        format!("{panel}->{command}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEvent {
    pub target: Option<String>,
    pub modifiers: Modifiers,
    pub key_code: Option<u32>,
    pub params: ActionParams,
    stopped: bool,
}

impl ActionEvent {
    pub fn new(target: Option<String>, params: ActionParams) -> Self {
        Self {
            target,
            modifiers: Modifiers::default(),
            key_code: None,
            params,
            stopped: false,
        }
    }

    pub fn key(key_code: u32, modifiers: Modifiers) -> Self {
        Self {
            target: None,
            modifiers,
            key_code: Some(key_code),
            params: ActionParams::default(),
            stopped: false,
        }
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
