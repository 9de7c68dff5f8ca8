//! Quick-access shortcuts. Ephemeral: addons add them again on every load.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortcut {
    pub id: String,
    pub addon: String,
    pub icon: String,
    pub icon_hover: String,
    pub keybind: String,
    pub tooltip: String,
    /// Pending notifications shown as a badge by the host.
    pub notifications: u32,
}

#[derive(Debug, Default)]
pub struct QuickAccess {
    shortcuts: Mutex<IndexMap<String, Shortcut>>,
}

impl QuickAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a shortcut. All ids are already namespaced; an id held
    /// by another addon is refused.
    pub fn add(
        &self,
        addon: &str,
        id: &str,
        icon: &str,
        icon_hover: &str,
        keybind: &str,
        tooltip: &str,
    ) -> Result<()> {
        for (field, value) in [
            ("id", id),
            ("icon", icon),
            ("iconHover", icon_hover),
            ("keybind", keybind),
            ("tooltip", tooltip),
        ] {
            if value.is_empty() {
                return Err(BridgeError::invalid(format!("shortcut {field} must not be empty")));
            }
        }

        let mut shortcuts = self.shortcuts.lock();
        if let Some(existing) = shortcuts.get(id) {
            if existing.addon != addon {
                return Err(BridgeError::invalid(format!(
                    "shortcut '{id}' belongs to another addon"
                )));
            }
        }
        shortcuts.insert(
            id.to_string(),
            Shortcut {
                id: id.to_string(),
                addon: addon.to_string(),
                icon: icon.to_string(),
                icon_hover: icon_hover.to_string(),
                keybind: keybind.to_string(),
                tooltip: tooltip.to_string(),
                notifications: 0,
            },
        );
        debug!(addon, id, "shortcut added");
        Ok(())
    }

    pub fn remove(&self, id: &str) -> bool {
        self.shortcuts.lock().shift_remove(id).is_some()
    }

    pub fn notify(&self, id: &str) -> Result<()> {
        let mut shortcuts = self.shortcuts.lock();
        let shortcut = shortcuts
            .get_mut(id)
            .ok_or_else(|| BridgeError::not_found(format!("shortcut '{id}'")))?;
        shortcut.notifications = shortcut.notifications.saturating_add(1);
        Ok(())
    }

    pub fn remove_all(&self, addon: &str) -> usize {
        let mut shortcuts = self.shortcuts.lock();
        let before = shortcuts.len();
        shortcuts.retain(|_, s| s.addon != addon);
        before - shortcuts.len()
    }

    pub fn list(&self) -> Vec<Shortcut> {
        self.shortcuts.lock().values().cloned().collect()
    }
}
