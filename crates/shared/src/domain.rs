use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(CallId);

pub const SHIFT_KEY_FLAG: u32 = 0x0100;
pub const CTRL_KEY_FLAG: u32 = 0x0200;
pub const ALT_KEY_FLAG: u32 = 0x0400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

impl Modifiers {
    /// Folds the modifier state into a key code the way shortcut bindings are keyed.
    pub fn shortcut_code(&self, key_code: u32) -> u32 {
        let mut code = key_code;
        if self.shift {
            code |= SHIFT_KEY_FLAG;
        }
        if self.ctrl {
            code |= CTRL_KEY_FLAG;
        }
        if self.alt {
            code |= ALT_KEY_FLAG;
        }
        code
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ControlValue {
    Scalar(String),
    Toggle(bool),
    MultiChoice(Vec<String>),
    Files(Vec<FilePayload>),
    CheckGroup(Vec<String>),
    RadioGroup(Option<String>),
    Button,
}

impl ControlValue {
    pub fn is_file(&self) -> bool {
        matches!(self, ControlValue::Files(_))
    }

    pub fn scalar(&self) -> Option<&str> {
        match self {
            ControlValue::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

/// Point-in-time view of one named control as the page currently holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSnapshot {
    pub id: String,
    pub value: ControlValue,
    #[serde(default)]
    pub disabled: bool,
}

impl ControlSnapshot {
    pub fn new(id: impl Into<String>, value: ControlValue) -> Self {
        Self {
            id: id.into(),
            value,
            disabled: false,
        }
    }

    pub fn scalar(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(id, ControlValue::Scalar(value.into()))
    }

    pub fn toggle(id: impl Into<String>, checked: bool) -> Self {
        Self::new(id, ControlValue::Toggle(checked))
    }

    pub fn button(id: impl Into<String>) -> Self {
        Self::new(id, ControlValue::Button)
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupSlot {
    Document,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderedRegion {
    Panel,
    Section,
    Popup(PopupSlot),
}
