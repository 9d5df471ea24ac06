use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::params::DocumentContext;

pub const DEFAULT_SETTINGS_FILE: &str = "dispatch.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub server_url: Option<String>,
    pub document_path: String,
    pub session_id: Option<String>,
    pub busy_indicator_id: Option<String>,
    pub hint_panel_id: Option<String>,
    pub content_open_path: Option<String>,
    pub popup_id: Option<String>,
    pub sys_info_id: Option<String>,
    pub tab_close_id: Option<String>,
    pub busy_indicator_delay_ms: u64,
    pub user_hint_display_ms: u64,
    pub delayed_post_min_delay_ms: u64,
    pub user_activity_window_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            document_path: "/".into(),
            session_id: None,
            busy_indicator_id: None,
            hint_panel_id: None,
            content_open_path: None,
            popup_id: None,
            sys_info_id: None,
            tab_close_id: None,
            busy_indicator_delay_ms: 200,
            user_hint_display_ms: 3_000,
            delayed_post_min_delay_ms: 250,
            user_activity_window_ms: 180_000,
        }
    }
}

impl RuntimeSettings {
    pub fn busy_indicator_delay(&self) -> Duration {
        Duration::from_millis(self.busy_indicator_delay_ms)
    }

    pub fn user_hint_display_period(&self) -> Duration {
        Duration::from_millis(self.user_hint_display_ms)
    }

    pub fn delayed_post_min_delay(&self) -> Duration {
        Duration::from_millis(self.delayed_post_min_delay_ms)
    }

    pub fn document(&self) -> DocumentContext {
        DocumentContext {
            path: self.document_path.clone(),
            session_id: self.session_id.clone(),
            popup_id: self.popup_id.clone(),
            sys_info_id: self.sys_info_id.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    document_path: Option<String>,
    session_id: Option<String>,
    busy_indicator_id: Option<String>,
    hint_panel_id: Option<String>,
    content_open_path: Option<String>,
    popup_id: Option<String>,
    sys_info_id: Option<String>,
    tab_close_id: Option<String>,
    busy_indicator_delay_ms: Option<u64>,
    user_hint_display_ms: Option<u64>,
    delayed_post_min_delay_ms: Option<u64>,
    user_activity_window_ms: Option<u64>,
}

impl FileSettings {
    fn merge_into(self, settings: &mut RuntimeSettings) {
        if self.server_url.is_some() {
            settings.server_url = self.server_url;
        }
        if let Some(v) = self.document_path {
            settings.document_path = v;
        }
        if self.session_id.is_some() {
            settings.session_id = self.session_id;
        }
        if self.busy_indicator_id.is_some() {
            settings.busy_indicator_id = self.busy_indicator_id;
        }
        if self.hint_panel_id.is_some() {
            settings.hint_panel_id = self.hint_panel_id;
        }
        if self.content_open_path.is_some() {
            settings.content_open_path = self.content_open_path;
        }
        if self.popup_id.is_some() {
            settings.popup_id = self.popup_id;
        }
        if self.sys_info_id.is_some() {
            settings.sys_info_id = self.sys_info_id;
        }
        if self.tab_close_id.is_some() {
            settings.tab_close_id = self.tab_close_id;
        }
        if let Some(v) = self.busy_indicator_delay_ms {
            settings.busy_indicator_delay_ms = v;
        }
        if let Some(v) = self.user_hint_display_ms {
            settings.user_hint_display_ms = v;
        }
        if let Some(v) = self.delayed_post_min_delay_ms {
            settings.delayed_post_min_delay_ms = v;
        }
        if let Some(v) = self.user_activity_window_ms {
            settings.user_activity_window_ms = v;
        }
    }
}

/// Defaults, then `dispatch.toml` in the working directory if present, then `APP__*` variables.
pub fn load_settings() -> RuntimeSettings {
    let mut settings = RuntimeSettings::default();
    if let Ok(raw) = fs::read_to_string(DEFAULT_SETTINGS_FILE) {
        if let Ok(file_cfg) = toml::from_str::<FileSettings>(&raw) {
            file_cfg.merge_into(&mut settings);
        }
    }
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Like [`load_settings`] but the file is named explicitly and must exist and parse.
pub fn load_settings_from(path: &Path) -> Result<RuntimeSettings, SettingsError> {
    let display = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: display.clone(),
        source,
    })?;
    let file_cfg = toml::from_str::<FileSettings>(&raw).map_err(|source| SettingsError::Parse {
        path: display,
        source,
    })?;
    let mut settings = RuntimeSettings::default();
    file_cfg.merge_into(&mut settings);
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn apply_overrides(settings: &mut RuntimeSettings, lookup: impl Fn(&str) -> Option<String>) {
    let text = |key: &str, slot: &mut Option<String>| {
        if let Some(v) = lookup(key) {
            *slot = Some(v);
        }
    };
    text("APP__SERVER_URL", &mut settings.server_url);
    text("APP__SESSION_ID", &mut settings.session_id);
    text("APP__BUSY_INDICATOR_ID", &mut settings.busy_indicator_id);
    text("APP__HINT_PANEL_ID", &mut settings.hint_panel_id);
    text("APP__CONTENT_OPEN_PATH", &mut settings.content_open_path);
    text("APP__POPUP_ID", &mut settings.popup_id);
    text("APP__SYS_INFO_ID", &mut settings.sys_info_id);
    text("APP__TAB_CLOSE_ID", &mut settings.tab_close_id);
    if let Some(v) = lookup("APP__DOCUMENT_PATH") {
        settings.document_path = v;
    }

    let millis = |key: &str, slot: &mut u64| {
        if let Some(parsed) = lookup(key).and_then(|v| v.parse::<u64>().ok()) {
            *slot = parsed;
        }
    };
    millis(
        "APP__BUSY_INDICATOR_DELAY_MS",
        &mut settings.busy_indicator_delay_ms,
    );
    millis("APP__USER_HINT_DISPLAY_MS", &mut settings.user_hint_display_ms);
    millis(
        "APP__DELAYED_POST_MIN_DELAY_MS",
        &mut settings.delayed_post_min_delay_ms,
    );
    millis(
        "APP__USER_ACTIVITY_WINDOW_MS",
        &mut settings.user_activity_window_ms,
    );
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
