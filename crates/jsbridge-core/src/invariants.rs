//! Invariant validation for the bridge state.
//!
//! Checked after every `Bridge::frame` in debug builds.

use std::collections::{HashMap, HashSet};

use crate::events::Subscription;
use crate::keybinds::Keybind;
use crate::window::{Window, WindowKey, MAIN_WINDOW};

/// Error indicating which invariant was violated.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("Window {0} appears more than once")]
    DuplicateWindow(String),

    #[error("Addon '{0}' is loaded without a main window")]
    MainWindowMissing(String),

    #[error("Window {0} belongs to an addon that is not loaded")]
    OrphanWindow(String),

    #[error("Keybind '{0}' belongs to an addon that is not loaded")]
    OrphanKeybind(String),

    #[error("Subscription {0} belongs to an addon that is not loaded")]
    OrphanSubscription(String),

    #[error("Chord {chord} is bound to both '{first}' and '{second}'")]
    SharedChord {
        chord: String,
        first: String,
        second: String,
    },
}

/// A consistent copy of the tables the invariants range over.
#[derive(Debug, Clone, Default)]
pub struct BridgeSnapshot {
    pub addons: Vec<String>,
    pub windows: Vec<Window>,
    pub keybinds: Vec<Keybind>,
    pub subscriptions: Vec<Subscription>,
}

/// Validate all bridge invariants. Returns the first violation found.
pub fn validate(state: &BridgeSnapshot) -> Result<(), InvariantError> {
    let loaded: HashSet<&str> = state.addons.iter().map(String::as_str).collect();

    // 1. Window keys are unique
    let mut seen: HashSet<&WindowKey> = HashSet::new();
    for window in &state.windows {
        if !seen.insert(&window.key) {
            return Err(InvariantError::DuplicateWindow(window.key.to_string()));
        }
        if !loaded.contains(window.key.addon.as_str()) {
            return Err(InvariantError::OrphanWindow(window.key.to_string()));
        }
    }

    // 2. Every loaded addon has its main window
    for addon in &state.addons {
        if !seen.contains(&WindowKey::new(addon.as_str(), MAIN_WINDOW)) {
            return Err(InvariantError::MainWindowMissing(addon.clone()));
        }
    }

    // 3. Keybinds are owned and never share a chord
    let mut chords = HashMap::new();
    for bind in &state.keybinds {
        if !loaded.contains(bind.addon.as_str()) {
            return Err(InvariantError::OrphanKeybind(bind.identifier.clone()));
        }
        if let Some(chord) = bind.current_chord {
            if let Some(first) = chords.insert(chord, &bind.identifier) {
                return Err(InvariantError::SharedChord {
                    chord: chord.to_string(),
                    first: first.clone(),
                    second: bind.identifier.clone(),
                });
            }
        }
    }

    // 4. Subscriptions are owned
    for sub in &state.subscriptions {
        if !loaded.contains(sub.addon.as_str()) {
            return Err(InvariantError::OrphanSubscription(sub.id.to_string()));
        }
    }

    Ok(())
}
