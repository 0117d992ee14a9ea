use serde::Serialize;
use serde_json::Value;
use std::future::Future;

use crate::error::Result;
use crate::shortcut::Shortcut;

/// Messages this view sends to the host relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum OutboundMessage {
    SwitchOrOpenUrl { url: String },
    GetFavicon { url: String },
}

/// Messages the host relay broadcasts to every view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundMessage {
    Toggle,
    UpdateShortcut(Shortcut),
    TabsChanged,
}

impl InboundMessage {
    /// Parses `{ "action": ..., "payload": ... }`; unknown actions yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let action = value.get("action")?.as_str()?;
        match action {
            "toggle" => Some(InboundMessage::Toggle),
            "tabsChanged" => Some(InboundMessage::TabsChanged),
            "updateShortcut" => {
                let payload = value.get("payload")?;
                let shortcut = payload.get("shortcut").unwrap_or(payload);
                match serde_json::from_value(shortcut.clone()) {
                    Ok(shortcut) => Some(InboundMessage::UpdateShortcut(shortcut)),
                    Err(err) => {
                        log::warn!("ignoring malformed shortcut update: {}", err);
                        None
                    }
                }
            }
            other => {
                log::debug!("ignoring unhandled relay action {}", other);
                None
            }
        }
    }
}

/// Cross-view broadcast channel provided by the host.
pub trait HostRelay {
    fn send(&self, message: OutboundMessage);
    fn request(&self, message: OutboundMessage) -> impl Future<Output = Result<Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_messages_use_action_payload_shape() {
        let value = serde_json::to_value(OutboundMessage::SwitchOrOpenUrl {
            url: "https://a.example/".to_string(),
        })
        .expect("serialize");
        assert_eq!(
            value,
            json!({ "action": "switchOrOpenUrl", "payload": { "url": "https://a.example/" } })
        );
    }

    #[test]
    fn inbound_messages_accept_bare_or_wrapped_shortcut() {
        let bare = json!({ "action": "updateShortcut", "payload": { "key": "j", "ctrl": true } });
        let wrapped = json!({ "action": "updateShortcut", "payload": { "shortcut": { "key": "j", "ctrl": true } } });
        let expected = InboundMessage::UpdateShortcut(Shortcut {
            key: "j".to_string(),
            ctrl: true,
            alt: false,
            shift: false,
            command: false,
        });
        assert_eq!(InboundMessage::from_value(&bare), Some(expected.clone()));
        assert_eq!(InboundMessage::from_value(&wrapped), Some(expected));
    }

    #[test]
    fn inbound_toggle_ignores_payload_and_unknown_actions_are_dropped() {
        assert_eq!(
            InboundMessage::from_value(&json!({ "action": "toggle", "payload": {} })),
            Some(InboundMessage::Toggle)
        );
        assert_eq!(InboundMessage::from_value(&json!({ "action": "reboot" })), None);
        assert_eq!(InboundMessage::from_value(&json!("toggle")), None);
    }
}
