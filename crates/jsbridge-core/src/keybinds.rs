//! Keybind registry.
//!
//! Maps chords to namespaced bind identifiers. Presses are delivered to the
//! owning addon's script queue; a release always goes to whichever keybind
//! received the matching press, even if the chord was rebound in between.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::handle::CallbackHandle;
use crate::input::{Chord, KeyCode, Modifiers};
use crate::script::{ScriptRoutes, ScriptTask};
use crate::store::KeyValueStore;

const STORE_PREFIX: &str = "keybind:";

/// What happens when a chord is claimed by a second keybind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The earlier keybind stays registered but becomes unbound.
    #[default]
    EvictOldest,
    /// The later registration or rebind fails with `InvalidArgument`.
    RejectNewest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keybind {
    /// Namespaced identifier, unique across addons.
    pub identifier: String,
    /// Identifier as the addon wrote it.
    pub local_id: String,
    pub addon: String,
    pub default_chord: Option<Chord>,
    pub current_chord: Option<Chord>,
    pub callback: CallbackHandle,
}

#[derive(Debug, Default)]
struct KeybindTable {
    binds: IndexMap<String, Keybind>,
    /// Physical key to the identifier that received its press.
    held: HashMap<KeyCode, String>,
}

impl KeybindTable {
    fn owner_of(&self, chord: Chord, except: &str) -> Option<String> {
        self.binds
            .values()
            .find(|b| b.current_chord == Some(chord) && b.identifier != except)
            .map(|b| b.identifier.clone())
    }

    /// Make room for `chord` on behalf of `claimant` per `policy`.
    fn claim(&mut self, chord: Chord, claimant: &str, policy: ConflictPolicy) -> Result<()> {
        let Some(holder) = self.owner_of(chord, claimant) else {
            return Ok(());
        };
        match policy {
            ConflictPolicy::EvictOldest => {
                if let Some(bind) = self.binds.get_mut(&holder) {
                    bind.current_chord = None;
                }
                warn!(%chord, evicted = %holder, by = claimant, "chord conflict, earlier keybind unbound");
                Ok(())
            },
            ConflictPolicy::RejectNewest => Err(BridgeError::invalid(format!(
                "chord {chord} is already bound to '{holder}'"
            ))),
        }
    }
}

pub struct KeybindRegistry {
    table: Mutex<KeybindTable>,
    routes: Arc<ScriptRoutes>,
    store: Arc<dyn KeyValueStore>,
    policy: ConflictPolicy,
}

impl KeybindRegistry {
    pub fn new(
        routes: Arc<ScriptRoutes>,
        store: Arc<dyn KeyValueStore>,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            table: Mutex::new(KeybindTable::default()),
            routes,
            store,
            policy,
        }
    }

    /// Register `identifier` for `addon`. A chord previously stored by
    /// [`KeybindRegistry::rebind`] wins over `default_chord`. Registering an
    /// identifier again replaces its handler.
    pub fn register(
        &self,
        addon: &str,
        identifier: &str,
        local_id: &str,
        default_chord: &str,
        callback: CallbackHandle,
    ) -> Result<()> {
        if local_id.is_empty() {
            return Err(BridgeError::invalid("keybind identifier must not be empty"));
        }
        let default_chord = Chord::parse_optional(default_chord)
            .map_err(|e| BridgeError::invalid(e.to_string()))?;

        let mut table = self.table.lock();

        if let Some(existing) = table.binds.get_mut(identifier) {
            if existing.addon != addon {
                return Err(BridgeError::invalid(format!(
                    "keybind '{identifier}' belongs to another addon"
                )));
            }
            existing.callback = callback;
            existing.default_chord = default_chord;
            debug!(addon, identifier, "keybind handler replaced");
            return Ok(());
        }

        let chord = self.stored_chord(identifier).unwrap_or(default_chord);
        if let Some(chord) = chord {
            table.claim(chord, identifier, self.policy)?;
        }

        table.binds.insert(
            identifier.to_string(),
            Keybind {
                identifier: identifier.to_string(),
                local_id: local_id.to_string(),
                addon: addon.to_string(),
                default_chord,
                current_chord: chord,
                callback,
            },
        );
        info!(
            addon,
            identifier,
            chord = %chord.map_or_else(|| "(unbound)".to_string(), |c| c.to_string()),
            "keybind registered"
        );
        Ok(())
    }

    /// Change the chord of `identifier` and persist it. Takes effect for the
    /// next input event; a key already held keeps its release target.
    pub fn rebind(&self, identifier: &str, chord: &str) -> Result<()> {
        let chord = Chord::parse_optional(chord).map_err(|e| BridgeError::invalid(e.to_string()))?;

        let mut table = self.table.lock();
        if !table.binds.contains_key(identifier) {
            return Err(BridgeError::not_found(format!("keybind '{identifier}'")));
        }
        if let Some(chord) = chord {
            table.claim(chord, identifier, self.policy)?;
        }
        if let Some(bind) = table.binds.get_mut(identifier) {
            bind.current_chord = chord;
        }
        drop(table);

        let stored = chord.map(|c| c.to_string()).unwrap_or_default();
        if let Err(e) = self.store.set(&store_key(identifier), &stored) {
            warn!(identifier, "failed to persist keybind: {}", e);
        }
        Ok(())
    }

    pub fn deregister(&self, identifier: &str) -> bool {
        let mut table = self.table.lock();
        let removed = table.binds.shift_remove(identifier).is_some();
        if removed {
            table.held.retain(|_, id| id != identifier);
            debug!(identifier, "keybind deregistered");
        }
        removed
    }

    pub fn deregister_all(&self, addon: &str) -> usize {
        let mut table = self.table.lock();
        let before = table.binds.len();
        table.binds.retain(|_, b| b.addon != addon);
        let removed = before - table.binds.len();

        let KeybindTable { binds, held } = &mut *table;
        held.retain(|_, id| binds.contains_key(id));
        removed
    }

    /// Route a physical key transition. Returns true if a keybind consumed it.
    pub fn handle_key(&self, key: KeyCode, modifiers: Modifiers, pressed: bool) -> bool {
        let delivery = {
            let mut table = self.table.lock();
            if pressed {
                if table.held.contains_key(&key) {
                    // Auto-repeat of a chord that is already down.
                    return true;
                }
                let chord = Chord::new(modifiers, key);
                let Some(bind) = table.binds.values().find(|b| b.current_chord == Some(chord))
                else {
                    return false;
                };
                let delivery = (bind.addon.clone(), bind.callback, bind.local_id.clone());
                let identifier = bind.identifier.clone();
                table.held.insert(key, identifier);
                delivery
            } else {
                let Some(identifier) = table.held.remove(&key) else {
                    return false;
                };
                match table.binds.get(&identifier) {
                    Some(bind) => (bind.addon.clone(), bind.callback, bind.local_id.clone()),
                    None => return true,
                }
            }
        };

        let (addon, callback, identifier) = delivery;
        self.routes.post(
            &addon,
            ScriptTask::Keybind {
                callback,
                identifier,
                is_release: !pressed,
            },
        );
        true
    }

    pub fn get(&self, identifier: &str) -> Option<Keybind> {
        self.table.lock().binds.get(identifier).cloned()
    }

    /// Identifiers of every registered keybind, in registration order.
    pub fn identifiers(&self) -> Vec<String> {
        self.table.lock().binds.keys().cloned().collect()
    }

    pub fn keybinds(&self) -> Vec<Keybind> {
        self.table.lock().binds.values().cloned().collect()
    }

    pub const fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    fn stored_chord(&self, identifier: &str) -> Option<Option<Chord>> {
        let stored = self.store.get(&store_key(identifier))?;
        match Chord::parse_optional(&stored) {
            Ok(chord) => Some(chord),
            Err(e) => {
                warn!(identifier, "ignoring stored chord: {}", e);
                None
            },
        }
    }
}

impl fmt::Debug for KeybindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeybindRegistry")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn store_key(identifier: &str) -> String {
    format!("{STORE_PREFIX}{identifier}")
}
