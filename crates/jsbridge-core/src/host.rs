//! The native host seam.
//!
//! Everything the bridge needs from the embedding application. All methods
//! are called on the host frame thread from inside `Bridge::frame` or
//! `Bridge::load_addon`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gamebinds::GameBind;
use crate::input::{KeyCode, Modifiers};
use crate::link::LinkRegionId;
use crate::pending::Resolver;
use crate::window::{WindowKey, WindowSpec, WindowSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryKind {
    Game,
    Addon,
    Common,
}

pub trait Host: Send + Sync {
    /// Start rendering `spec.url` into a new overlay surface. The error is a
    /// human-readable reason reported back to the script.
    fn load_content(&self, spec: &WindowSpec) -> Result<(), String>;

    /// Tear down the surface of a closed window. Also called for windows
    /// whose content never finished loading, where it must do nothing.
    fn destroy_content(&self, key: &WindowKey);

    /// Feed a game-bind transition to the game.
    fn game_bind(&self, bind: GameBind, pressed: bool);

    /// Feed a physical key that no keybind consumed to the game.
    fn forward_key(&self, key: KeyCode, modifiers: Modifiers, pressed: bool);

    fn is_bound(&self, bind: GameBind) -> bool;

    /// `name` selects a subdirectory for [`DirectoryKind::Addon`].
    fn directory(&self, kind: DirectoryKind, name: Option<&str>) -> Option<PathBuf>;

    fn alert(&self, message: &str);
}

/// Native work requested from the script context, run by `Bridge::frame`.
#[derive(Debug)]
pub(crate) enum HostTask {
    CreateWindow {
        spec: WindowSpec,
        resolver: Resolver<WindowSummary>,
    },
    DestroyWindow {
        key: WindowKey,
    },
    ListWindows {
        addon: String,
        resolver: Resolver<Vec<WindowSummary>>,
    },
    ReadLink {
        region: LinkRegionId,
        resolver: Resolver<Value>,
    },
    IsBound {
        bind: GameBind,
        resolver: Resolver<bool>,
    },
    Directory {
        kind: DirectoryKind,
        name: Option<String>,
        resolver: Resolver<String>,
    },
    Translate {
        scoped_id: String,
        bare_id: String,
        resolver: Resolver<String>,
    },
    Alert {
        addon: String,
        message: String,
    },
}
