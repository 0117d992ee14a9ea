use serde::{Deserialize, Serialize};

/// Persisted under the `shortcut` key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortcut {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub command: bool,
}

impl Default for Shortcut {
    fn default() -> Self {
        Self {
            key: "k".to_string(),
            ctrl: false,
            alt: true,
            shift: false,
            command: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
    /// Focus is in an input, textarea or contenteditable element.
    #[serde(default)]
    pub in_text_input: bool,
}

impl Shortcut {
    pub fn matches(&self, event: &KeyEvent) -> bool {
        if event.in_text_input || self.key.is_empty() {
            return false;
        }
        event.key.eq_ignore_ascii_case(&self.key)
            && event.ctrl == self.ctrl
            && event.alt == self.alt
            && event.shift == self.shift
            && event.meta == self.command
    }
}
