//! Input handling
//!
//! Key chords, and the single input queue through which physical key events
//! and synthesized game binds reach the host in enqueue order.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::gamebinds::GameBind;

/// Chord parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChordError {
    #[error("Invalid key: {0}")]
    Key(String),
    #[error("Chord has no key: {0}")]
    MissingKey(String),
    #[error("Chord has more than one key: {0}")]
    ExtraKey(String),
}

bitflags! {
    /// Keyboard modifiers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0000_0001;
        const CTRL  = 0b0000_0010;
        const ALT   = 0b0000_0100;
        const SUPER = 0b0000_1000;
    }
}

impl Modifiers {
    fn from_modifier_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "shift" => Some(Self::SHIFT),
            "ctrl" | "control" => Some(Self::CTRL),
            "alt" | "mod1" => Some(Self::ALT),
            "super" | "mod4" | "win" | "logo" => Some(Self::SUPER),
            _ => None,
        }
    }
}

/// A key code
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyCode {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,

    Key0, Key1, Key2, Key3, Key4, Key5, Key6, Key7, Key8, Key9,

    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,

    Escape,
    Tab,
    Space,
    Return,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Left,
    Right,
    Up,
    Down,

    Minus,
    Equal,
    BracketLeft,
    BracketRight,
    Semicolon,
    Apostrophe,
    Grave,
    Backslash,
    Comma,
    Period,
    Slash,

    Print,
    ScrollLock,
    Pause,

    Kp0, Kp1, Kp2, Kp3, Kp4, Kp5, Kp6, Kp7, Kp8, Kp9,
    KpDecimal,
    KpDivide,
    KpMultiply,
    KpSubtract,
    KpAdd,
    KpEnter,
}

/// Canonical name first; additional entries are accepted aliases.
#[rustfmt::skip]
const KEY_NAMES: &[(&str, KeyCode)] = &[
    ("A", KeyCode::A), ("B", KeyCode::B), ("C", KeyCode::C), ("D", KeyCode::D),
    ("E", KeyCode::E), ("F", KeyCode::F), ("G", KeyCode::G), ("H", KeyCode::H),
    ("I", KeyCode::I), ("J", KeyCode::J), ("K", KeyCode::K), ("L", KeyCode::L),
    ("M", KeyCode::M), ("N", KeyCode::N), ("O", KeyCode::O), ("P", KeyCode::P),
    ("Q", KeyCode::Q), ("R", KeyCode::R), ("S", KeyCode::S), ("T", KeyCode::T),
    ("U", KeyCode::U), ("V", KeyCode::V), ("W", KeyCode::W), ("X", KeyCode::X),
    ("Y", KeyCode::Y), ("Z", KeyCode::Z),
    ("0", KeyCode::Key0), ("1", KeyCode::Key1), ("2", KeyCode::Key2),
    ("3", KeyCode::Key3), ("4", KeyCode::Key4), ("5", KeyCode::Key5),
    ("6", KeyCode::Key6), ("7", KeyCode::Key7), ("8", KeyCode::Key8),
    ("9", KeyCode::Key9),
    ("F1", KeyCode::F1), ("F2", KeyCode::F2), ("F3", KeyCode::F3), ("F4", KeyCode::F4),
    ("F5", KeyCode::F5), ("F6", KeyCode::F6), ("F7", KeyCode::F7), ("F8", KeyCode::F8),
    ("F9", KeyCode::F9), ("F10", KeyCode::F10), ("F11", KeyCode::F11), ("F12", KeyCode::F12),
    ("ESCAPE", KeyCode::Escape), ("ESC", KeyCode::Escape),
    ("TAB", KeyCode::Tab),
    ("SPACE", KeyCode::Space),
    ("RETURN", KeyCode::Return), ("ENTER", KeyCode::Return),
    ("BACKSPACE", KeyCode::Backspace),
    ("DELETE", KeyCode::Delete), ("DEL", KeyCode::Delete),
    ("INSERT", KeyCode::Insert), ("INS", KeyCode::Insert),
    ("HOME", KeyCode::Home),
    ("END", KeyCode::End),
    ("PAGEUP", KeyCode::PageUp), ("PAGE_UP", KeyCode::PageUp), ("PRIOR", KeyCode::PageUp),
    ("PAGEDOWN", KeyCode::PageDown), ("PAGE_DOWN", KeyCode::PageDown), ("NEXT", KeyCode::PageDown),
    ("LEFT", KeyCode::Left),
    ("RIGHT", KeyCode::Right),
    ("UP", KeyCode::Up),
    ("DOWN", KeyCode::Down),
    ("MINUS", KeyCode::Minus), ("-", KeyCode::Minus),
    ("EQUAL", KeyCode::Equal), ("=", KeyCode::Equal),
    ("BRACKETLEFT", KeyCode::BracketLeft), ("[", KeyCode::BracketLeft),
    ("BRACKETRIGHT", KeyCode::BracketRight), ("]", KeyCode::BracketRight),
    ("SEMICOLON", KeyCode::Semicolon), (";", KeyCode::Semicolon),
    ("APOSTROPHE", KeyCode::Apostrophe), ("'", KeyCode::Apostrophe),
    ("GRAVE", KeyCode::Grave), ("`", KeyCode::Grave),
    ("BACKSLASH", KeyCode::Backslash), ("\\", KeyCode::Backslash),
    ("COMMA", KeyCode::Comma), (",", KeyCode::Comma),
    ("PERIOD", KeyCode::Period), (".", KeyCode::Period),
    ("SLASH", KeyCode::Slash), ("/", KeyCode::Slash),
    ("PRINT", KeyCode::Print),
    ("SCROLLLOCK", KeyCode::ScrollLock), ("SCROLL_LOCK", KeyCode::ScrollLock),
    ("PAUSE", KeyCode::Pause),
    ("NUM0", KeyCode::Kp0), ("KP0", KeyCode::Kp0),
    ("NUM1", KeyCode::Kp1), ("KP1", KeyCode::Kp1),
    ("NUM2", KeyCode::Kp2), ("KP2", KeyCode::Kp2),
    ("NUM3", KeyCode::Kp3), ("KP3", KeyCode::Kp3),
    ("NUM4", KeyCode::Kp4), ("KP4", KeyCode::Kp4),
    ("NUM5", KeyCode::Kp5), ("KP5", KeyCode::Kp5),
    ("NUM6", KeyCode::Kp6), ("KP6", KeyCode::Kp6),
    ("NUM7", KeyCode::Kp7), ("KP7", KeyCode::Kp7),
    ("NUM8", KeyCode::Kp8), ("KP8", KeyCode::Kp8),
    ("NUM9", KeyCode::Kp9), ("KP9", KeyCode::Kp9),
    ("NUMDECIMAL", KeyCode::KpDecimal), ("KPDECIMAL", KeyCode::KpDecimal),
    ("NUMDIVIDE", KeyCode::KpDivide), ("KPDIVIDE", KeyCode::KpDivide),
    ("NUMMULTIPLY", KeyCode::KpMultiply), ("KPMULTIPLY", KeyCode::KpMultiply),
    ("NUMSUBTRACT", KeyCode::KpSubtract), ("KPSUBTRACT", KeyCode::KpSubtract),
    ("NUMADD", KeyCode::KpAdd), ("KPADD", KeyCode::KpAdd),
    ("NUMENTER", KeyCode::KpEnter), ("KPENTER", KeyCode::KpEnter),
];

impl KeyCode {
    /// Parse a key name, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, ChordError> {
        let upper = name.trim().to_uppercase();
        KEY_NAMES
            .iter()
            .find(|(n, _)| *n == upper)
            .map(|(_, key)| *key)
            .ok_or_else(|| ChordError::Key(name.to_string()))
    }

    /// Canonical name, as written back by [`Chord`]'s `Display`.
    pub fn name(self) -> &'static str {
        KEY_NAMES
            .iter()
            .find(|(_, key)| *key == self)
            .map_or("?", |(n, _)| *n)
    }
}

/// Modifiers plus one key, e.g. `CTRL+SHIFT+K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub modifiers: Modifiers,
    pub key: KeyCode,
}

impl Chord {
    pub const fn new(modifiers: Modifiers, key: KeyCode) -> Self {
        Self { modifiers, key }
    }

    /// Parse a chord string like "Ctrl+Shift+K".
    pub fn parse(s: &str) -> Result<Self, ChordError> {
        Self::parse_optional(s)?.ok_or_else(|| ChordError::MissingKey(s.to_string()))
    }

    /// Like [`Chord::parse`], but an empty string or `(null)` means unbound.
    pub fn parse_optional(s: &str) -> Result<Option<Self>, ChordError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("(null)") {
            return Ok(None);
        }

        let mut modifiers = Modifiers::empty();
        let mut key: Option<KeyCode> = None;

        for part in trimmed.split('+') {
            let part = part.trim();
            if let Some(m) = Modifiers::from_modifier_name(part) {
                modifiers.insert(m);
                continue;
            }
            if key.is_some() {
                return Err(ChordError::ExtraKey(s.to_string()));
            }
            // "CTRL+" leaves an empty part; numpad plus is spelled NUMADD.
            if part.is_empty() {
                return Err(ChordError::MissingKey(s.to_string()));
            }
            key = Some(KeyCode::from_name(part)?);
        }

        match key {
            Some(key) => Ok(Some(Self { modifiers, key })),
            None => Err(ChordError::MissingKey(s.to_string())),
        }
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, name) in [
            (Modifiers::CTRL, "CTRL"),
            (Modifiers::ALT, "ALT"),
            (Modifiers::SHIFT, "SHIFT"),
            (Modifiers::SUPER, "SUPER"),
        ] {
            if self.modifiers.contains(flag) {
                write!(f, "{name}+")?;
            }
        }
        f.write_str(self.key.name())
    }
}

impl FromStr for Chord {
    type Err = ChordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Chord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Chord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// One entry of the host input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Key {
        key: KeyCode,
        modifiers: Modifiers,
        pressed: bool,
    },
    GameBind {
        bind: GameBind,
        pressed: bool,
    },
}

/// Multi-producer queue drained once per frame on the host thread.
#[derive(Debug, Clone)]
pub struct InputQueue {
    tx: Sender<InputEvent>,
    rx: Receiver<InputEvent>,
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InputQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, event: InputEvent) {
        // Both ends live in self, so the channel cannot be disconnected.
        let _ = self.tx.send(event);
    }

    /// Take everything queued so far, in enqueue order.
    pub fn drain(&self) -> Vec<InputEvent> {
        self.rx.try_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
