//! Script calls as JSON messages.
//!
//! A script runtime outside the host process drives an [`AddonSurface`] with
//! `{"action": "...", ...}` objects and receives [`DispatchMessage`]s back.
//! Async actions carry a `requestId`; their completion arrives as a
//! `response` message with the same id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::handle::CallbackHandle;
use crate::host::DirectoryKind;
use crate::link::LinkRegionId;
use crate::script::RequestId;
use crate::surface::{AddonSurface, LogLevel};
use crate::window::{PassthroughArg, WindowOptions, WindowUpdate};

/// One script API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ScriptCall {
    #[serde(rename = "log")]
    Log {
        level: i64,
        #[serde(default)]
        channel: String,
        message: String,
    },
    #[serde(rename = "alert")]
    Alert { message: String },

    #[serde(rename = "events_subscribe")]
    EventsSubscribe { name: String, callback: CallbackHandle },
    #[serde(rename = "events_unsubscribe")]
    EventsUnsubscribe { name: String, callback: CallbackHandle },
    #[serde(rename = "events_raise")]
    EventsRaise {
        name: String,
        #[serde(default)]
        data: Value,
    },

    #[serde(rename = "keybinds_register", rename_all = "camelCase")]
    KeybindsRegister {
        id: String,
        #[serde(default)]
        default_bind: String,
        callback: CallbackHandle,
    },
    #[serde(rename = "keybinds_deregister")]
    KeybindsDeregister { id: String },

    #[serde(rename = "gamebinds_press")]
    GameBindsPress { bind: i32 },
    #[serde(rename = "gamebinds_release")]
    GameBindsRelease { bind: i32 },
    #[serde(rename = "gamebinds_invoke", rename_all = "camelCase")]
    GameBindsInvoke {
        bind: i32,
        #[serde(default)]
        duration_ms: u64,
    },
    #[serde(rename = "gamebinds_isBound", rename_all = "camelCase")]
    GameBindsIsBound { request_id: RequestId, bind: i32 },

    #[serde(rename = "datalink_getMumbleLink", rename_all = "camelCase")]
    DataLinkGetMumbleLink { request_id: RequestId },
    #[serde(rename = "datalink_getNexusLink", rename_all = "camelCase")]
    DataLinkGetNexusLink { request_id: RequestId },

    #[serde(rename = "paths_getGameDirectory", rename_all = "camelCase")]
    PathsGetGameDirectory { request_id: RequestId },
    #[serde(rename = "paths_getAddonDirectory", rename_all = "camelCase")]
    PathsGetAddonDirectory {
        request_id: RequestId,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "paths_getCommonDirectory", rename_all = "camelCase")]
    PathsGetCommonDirectory { request_id: RequestId },

    #[serde(rename = "quickaccess_add", rename_all = "camelCase")]
    QuickAccessAdd {
        id: String,
        texture: String,
        texture_hover: String,
        keybind: String,
        #[serde(default)]
        tooltip: String,
    },
    #[serde(rename = "quickaccess_remove")]
    QuickAccessRemove { id: String },
    #[serde(rename = "quickaccess_notify")]
    QuickAccessNotify { id: String },

    #[serde(rename = "localization_translate", rename_all = "camelCase")]
    LocalizationTranslate { request_id: RequestId, id: String },
    #[serde(rename = "localization_set")]
    LocalizationSet { id: String, lang: String, text: String },

    #[serde(rename = "windows_create", rename_all = "camelCase")]
    WindowsCreate {
        request_id: RequestId,
        window_id: String,
        url: String,
        #[serde(default)]
        width: Option<i64>,
        #[serde(default)]
        height: Option<i64>,
        #[serde(default)]
        title: Option<String>,
    },
    #[serde(rename = "windows_close", rename_all = "camelCase")]
    WindowsClose { window_id: String },
    #[serde(rename = "windows_update", rename_all = "camelCase")]
    WindowsUpdate {
        window_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
        #[serde(default)]
        width: Option<i64>,
        #[serde(default)]
        height: Option<i64>,
        #[serde(default)]
        visible: Option<bool>,
    },
    #[serde(rename = "windows_setInputPassthrough", rename_all = "camelCase")]
    WindowsSetInputPassthrough {
        window_id: String,
        enabled: PassthroughArg,
    },
    #[serde(rename = "windows_list", rename_all = "camelCase")]
    WindowsList { request_id: RequestId },
}

impl ScriptCall {
    /// The id an async call will answer with, if it is one.
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::GameBindsIsBound { request_id, .. }
            | Self::DataLinkGetMumbleLink { request_id }
            | Self::DataLinkGetNexusLink { request_id }
            | Self::PathsGetGameDirectory { request_id }
            | Self::PathsGetAddonDirectory { request_id, .. }
            | Self::PathsGetCommonDirectory { request_id }
            | Self::LocalizationTranslate { request_id, .. }
            | Self::WindowsCreate { request_id, .. }
            | Self::WindowsList { request_id } => Some(*request_id),
            _ => None,
        }
    }
}

/// Native to script message, the counterpart of [`ScriptCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DispatchMessage {
    Event {
        callback: CallbackHandle,
        name: String,
        data: Value,
    },
    #[serde(rename_all = "camelCase")]
    Keybind {
        callback: CallbackHandle,
        id: String,
        is_release: bool,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: RequestId,
        success: bool,
        /// The result on success, `{kind, message}` on failure.
        value: Value,
    },
}

impl DispatchMessage {
    pub fn response(request_id: RequestId, result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::Response {
                request_id,
                success: true,
                value,
            },
            Err(e) => Self::Response {
                request_id,
                success: false,
                value: e.to_value(),
            },
        }
    }
}

impl AddonSurface {
    /// Run one wire call against this surface.
    ///
    /// Synchronous failures are returned. Async calls always return `Ok`;
    /// their outcome is posted to the script queue as a response.
    pub fn dispatch(&self, call: ScriptCall) -> Result<()> {
        match call {
            ScriptCall::Log {
                level,
                channel,
                message,
            } => self.log().write(LogLevel::from_number(level)?, &channel, &message),
            ScriptCall::Alert { message } => self.alert(&message)?,

            ScriptCall::EventsSubscribe { name, callback } => {
                self.events().subscribe(&name, callback)?;
            },
            ScriptCall::EventsUnsubscribe { name, callback } => {
                self.events().unsubscribe(&name, callback)?;
            },
            ScriptCall::EventsRaise { name, data } => {
                self.events().raise(&name, data)?;
            },

            ScriptCall::KeybindsRegister {
                id,
                default_bind,
                callback,
            } => self.keybinds().register(&id, &default_bind, callback)?,
            ScriptCall::KeybindsDeregister { id } => {
                self.keybinds().deregister(&id)?;
            },

            ScriptCall::GameBindsPress { bind } => self.gamebinds().press(bind)?,
            ScriptCall::GameBindsRelease { bind } => self.gamebinds().release(bind)?,
            ScriptCall::GameBindsInvoke { bind, duration_ms } => {
                self.gamebinds().invoke(bind, duration_ms)?;
            },
            ScriptCall::GameBindsIsBound { request_id, bind } => {
                self.gamebinds()
                    .is_bound_with(bind, self.responder(request_id));
            },

            ScriptCall::DataLinkGetMumbleLink { request_id } => {
                self.datalink()
                    .read_with(LinkRegionId::Mumble, self.responder(request_id));
            },
            ScriptCall::DataLinkGetNexusLink { request_id } => {
                self.datalink()
                    .read_with(LinkRegionId::Nexus, self.responder(request_id));
            },

            ScriptCall::PathsGetGameDirectory { request_id } => {
                self.paths()
                    .directory_with(DirectoryKind::Game, None, self.responder(request_id));
            },
            ScriptCall::PathsGetAddonDirectory { request_id, name } => {
                self.paths().directory_with(
                    DirectoryKind::Addon,
                    name.as_deref(),
                    self.responder(request_id),
                );
            },
            ScriptCall::PathsGetCommonDirectory { request_id } => {
                self.paths()
                    .directory_with(DirectoryKind::Common, None, self.responder(request_id));
            },

            ScriptCall::QuickAccessAdd {
                id,
                texture,
                texture_hover,
                keybind,
                tooltip,
            } => self
                .quickaccess()
                .add(&id, &texture, &texture_hover, &keybind, &tooltip)?,
            ScriptCall::QuickAccessRemove { id } => {
                self.quickaccess().remove(&id)?;
            },
            ScriptCall::QuickAccessNotify { id } => self.quickaccess().notify(&id)?,

            ScriptCall::LocalizationTranslate { request_id, id } => {
                self.localization()
                    .translate_with(&id, self.responder(request_id));
            },
            ScriptCall::LocalizationSet { id, lang, text } => {
                self.localization().set(&id, &lang, &text)?;
            },

            ScriptCall::WindowsCreate {
                request_id,
                window_id,
                url,
                width,
                height,
                title,
            } => {
                let options = WindowOptions {
                    url,
                    width,
                    height,
                    // Scripts send "" for an omitted title.
                    title: title.filter(|t| !t.is_empty()),
                };
                self.windows()
                    .create_with(&window_id, &options, self.responder(request_id));
            },
            ScriptCall::WindowsClose { window_id } => self.windows().close(&window_id)?,
            ScriptCall::WindowsUpdate {
                window_id,
                title,
                x,
                y,
                width,
                height,
                visible,
            } => {
                let update = WindowUpdate {
                    title,
                    x,
                    y,
                    width,
                    height,
                    visible,
                };
                self.windows().update(&window_id, &update)?;
            },
            ScriptCall::WindowsSetInputPassthrough { window_id, enabled } => {
                self.windows().set_input_passthrough(&window_id, enabled)?;
            },
            ScriptCall::WindowsList { request_id } => {
                self.windows().list_with(self.responder(request_id));
            },
        }
        Ok(())
    }

    /// Parse and run one wire call. A call that does not parse but names a
    /// `requestId` is still answered, with the parse error.
    pub fn dispatch_json(&self, json: &str) -> Result<()> {
        match parse_call(json) {
            Ok(call) => self.dispatch(call),
            Err(e) => {
                if let Some(request_id) = request_id_of(json) {
                    self.reject(request_id, e.clone());
                }
                Err(e)
            },
        }
    }
}

/// Parse a wire call, mapping malformed JSON to `InvalidArgument`.
pub fn parse_call(json: &str) -> Result<ScriptCall> {
    serde_json::from_str(json).map_err(|e| BridgeError::invalid(format!("malformed call: {e}")))
}

/// The `requestId` of a call object, whether or not the rest of it parses.
fn request_id_of(json: &str) -> Option<RequestId> {
    serde_json::from_str::<Value>(json)
        .ok()?
        .get("requestId")?
        .as_u64()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_sync_calls() {
        assert_eq!(
            parse_call(r#"{"action":"log","level":3,"channel":"demo","message":"hi"}"#).unwrap(),
            ScriptCall::Log {
                level: 3,
                channel: "demo".into(),
                message: "hi".into(),
            }
        );
        assert_eq!(
            parse_call(r#"{"action":"events_raise","name":"ping"}"#).unwrap(),
            ScriptCall::EventsRaise {
                name: "ping".into(),
                data: Value::Null,
            }
        );
        assert_eq!(
            parse_call(
                r#"{"action":"keybinds_register","id":"toggle","defaultBind":"CTRL+K","callback":4}"#
            )
            .unwrap(),
            ScriptCall::KeybindsRegister {
                id: "toggle".into(),
                default_bind: "CTRL+K".into(),
                callback: CallbackHandle(4),
            }
        );
    }

    #[test]
    fn test_parse_async_calls() {
        let call = parse_call(r#"{"action":"gamebinds_isBound","requestId":7,"bind":9}"#).unwrap();
        assert_eq!(call.request_id(), Some(7));

        let call = parse_call(
            r#"{"action":"windows_create","requestId":2,"windowId":"w1","url":"a.html","width":400,"height":300,"title":""}"#,
        )
        .unwrap();
        assert_eq!(
            call,
            ScriptCall::WindowsCreate {
                request_id: 2,
                window_id: "w1".into(),
                url: "a.html".into(),
                width: Some(400),
                height: Some(300),
                title: Some(String::new()),
            }
        );
    }

    #[test]
    fn test_passthrough_argument_forms() {
        let toggle = parse_call(
            r#"{"action":"windows_setInputPassthrough","windowId":"main","enabled":true}"#,
        )
        .unwrap();
        assert_eq!(
            toggle,
            ScriptCall::WindowsSetInputPassthrough {
                window_id: "main".into(),
                enabled: PassthroughArg::Toggle(true),
            }
        );

        let threshold = parse_call(
            r#"{"action":"windows_setInputPassthrough","windowId":"main","enabled":10}"#,
        )
        .unwrap();
        assert!(matches!(
            threshold,
            ScriptCall::WindowsSetInputPassthrough {
                enabled: PassthroughArg::Threshold(10),
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(matches!(
            parse_call(r#"{"action":"teleport"}"#),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(parse_call("not json").is_err());
    }

    #[test]
    fn test_request_id_of_malformed_call() {
        let bad_width =
            r#"{"action":"windows_create","requestId":5,"windowId":"w1","url":"a.html","width":1.5}"#;
        assert!(parse_call(bad_width).is_err());
        assert_eq!(request_id_of(bad_width), Some(5));
        assert_eq!(request_id_of(r#"{"action":"teleport"}"#), None);
        assert_eq!(request_id_of(r#"{"requestId":"5"}"#), None);
        assert_eq!(request_id_of("not json"), None);
    }

    #[test]
    fn test_dispatch_message_shapes() {
        let event = DispatchMessage::Event {
            callback: CallbackHandle(1),
            name: "ping".into(),
            data: json!({"n": 1}),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "event", "callback": 1, "name": "ping", "data": {"n": 1}})
        );

        let keybind = DispatchMessage::Keybind {
            callback: CallbackHandle(2),
            id: "toggle".into(),
            is_release: true,
        };
        assert_eq!(
            serde_json::to_value(&keybind).unwrap(),
            json!({"type": "keybind", "callback": 2, "id": "toggle", "isRelease": true})
        );

        let failed = DispatchMessage::response(3, Err(BridgeError::not_found("window 'w1'")));
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({
                "type": "response",
                "requestId": 3,
                "success": false,
                "value": {"kind": "NotFound", "message": "not found: window 'w1'"}
            })
        );
    }
}
