//! Overlay window management
//!
//! Owns the table of overlay windows for every loaded addon. Creation is two
//! phase: [`WindowManager::begin_create`] reserves the id in the `Creating`
//! state, the host loads content on its frame thread, and
//! [`WindowManager::finish_create`] commits or rolls back. A window closed
//! while `Creating` makes the pending creation resolve `NotFound`.

use std::fmt;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

/// Id of the implicit per-addon overlay.
pub const MAIN_WINDOW: &str = "main";

/// Rectangle geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x
            && py >= self.y
            && (px as i64) < self.x as i64 + self.width as i64
            && (py as i64) < self.y as i64 + self.height as i64
    }
}

/// How pointer input over a window reaches the game underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "threshold", rename_all = "snake_case")]
pub enum PassthroughMode {
    /// The window captures all pointer input.
    #[default]
    Off,
    /// All pointer input passes through.
    Full,
    /// Input passes through over pixels with alpha at or below the threshold.
    AlphaThreshold(u8),
}

impl PassthroughMode {
    pub const fn passes_through(self, alpha: u8) -> bool {
        match self {
            Self::Off => false,
            Self::Full => true,
            Self::AlphaThreshold(n) => alpha <= n,
        }
    }
}

/// Script-side passthrough argument: a toggle or an alpha threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PassthroughArg {
    Toggle(bool),
    Threshold(i64),
}

impl TryFrom<PassthroughArg> for PassthroughMode {
    type Error = BridgeError;

    fn try_from(arg: PassthroughArg) -> Result<Self> {
        match arg {
            PassthroughArg::Toggle(true) => Ok(Self::Full),
            PassthroughArg::Toggle(false) => Ok(Self::Off),
            PassthroughArg::Threshold(n) => u8::try_from(n)
                .map(Self::AlphaThreshold)
                .map_err(|_| BridgeError::invalid(format!("alpha threshold {n} not in 0..=255"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowLifecycle {
    Creating,
    Open,
    Closed,
}

/// Addon-scoped window identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub addon: String,
    pub id: String,
}

impl WindowKey {
    pub fn new(addon: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            addon: addon.into(),
            id: id.into(),
        }
    }

    pub fn is_main(&self) -> bool {
        self.id == MAIN_WINDOW
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addon, self.id)
    }
}

/// `windows.create` options as scripts send them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowOptions {
    pub url: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub title: Option<String>,
}

/// `windows.update` fields; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowUpdate {
    pub title: Option<String>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub visible: Option<bool>,
}

/// What the host needs to load a window's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub key: WindowKey,
    pub url: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    serial: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub key: WindowKey,
    pub title: String,
    pub geometry: Geometry,
    pub passthrough: PassthroughMode,
    pub content_source: String,
    pub lifecycle: WindowLifecycle,
    pub visible: bool,
    serial: u64,
}

impl Window {
    pub fn summary(&self) -> WindowSummary {
        WindowSummary {
            id: self.key.id.clone(),
            title: self.title.clone(),
            url: self.content_source.clone(),
            x: self.geometry.x,
            y: self.geometry.y,
            width: self.geometry.width,
            height: self.geometry.height,
            visible: self.visible,
            passthrough: self.passthrough,
            state: self.lifecycle,
        }
    }
}

/// Script-facing view of a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    pub id: String,
    pub title: String,
    pub url: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub visible: bool,
    pub passthrough: PassthroughMode,
    pub state: WindowLifecycle,
}

/// Outcome of [`WindowManager::route_pointer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerRoute {
    /// The window under the pointer takes the event, in window coordinates.
    Window { key: WindowKey, x: i32, y: i32 },
    /// Forward to the game.
    PassThrough,
}

/// Resolve a script-supplied URL against the addon origin.
pub fn resolve_url(addon: &str, url: &str) -> String {
    if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
        return url.to_string();
    }
    format!("https://{addon}.jsloader.local/{}", url.trim_start_matches('/'))
}

fn positive(name: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| BridgeError::invalid(format!("{name} must be a positive integer, got {value}")))
}

#[derive(Debug, Default)]
struct WindowTable {
    windows: IndexMap<WindowKey, Window>,
    next_serial: u64,
}

impl WindowTable {
    fn is_creating(&self, spec: &WindowSpec) -> bool {
        self.windows.get(&spec.key).is_some_and(|w| {
            w.serial == spec.serial && w.lifecycle == WindowLifecycle::Creating
        })
    }
}

#[derive(Debug)]
pub struct WindowManager {
    table: Mutex<WindowTable>,
    default_width: u32,
    default_height: u32,
}

impl WindowManager {
    pub fn new(default_width: u32, default_height: u32) -> Self {
        Self {
            table: Mutex::new(WindowTable::default()),
            default_width,
            default_height,
        }
    }

    /// Build the spec for an addon's main window. The caller loads it
    /// before [`WindowManager::insert_main`].
    pub fn main_spec(&self, addon: &str, title: &str, entry: &str) -> WindowSpec {
        WindowSpec {
            key: WindowKey::new(addon, MAIN_WINDOW),
            url: resolve_url(addon, entry),
            title: title.to_string(),
            width: self.default_width,
            height: self.default_height,
            serial: 0,
        }
    }

    pub fn insert_main(&self, spec: &WindowSpec) {
        let mut table = self.table.lock();
        table.next_serial += 1;
        let serial = table.next_serial;
        table.windows.insert(spec.key.clone(), open_window(spec, serial));
        info!(window = %spec.key, url = %spec.url, "main window open");
    }

    /// Validate `options` and reserve `id` in the `Creating` state.
    pub fn begin_create(&self, addon: &str, id: &str, options: &WindowOptions) -> Result<WindowSpec> {
        if id.is_empty() {
            return Err(BridgeError::invalid("window id must not be empty"));
        }
        if options.url.is_empty() {
            return Err(BridgeError::invalid("window url is required"));
        }
        let width = options
            .width
            .map_or(Ok(self.default_width), |w| positive("width", w))?;
        let height = options
            .height
            .map_or(Ok(self.default_height), |h| positive("height", h))?;

        let key = WindowKey::new(addon, id);
        let mut table = self.table.lock();
        if table.windows.contains_key(&key) {
            return Err(BridgeError::DuplicateWindow(id.to_string()));
        }

        table.next_serial += 1;
        let spec = WindowSpec {
            url: resolve_url(addon, &options.url),
            title: options.title.clone().unwrap_or_else(|| id.to_string()),
            key: key.clone(),
            width,
            height,
            serial: table.next_serial,
        };
        let mut window = open_window(&spec, spec.serial);
        window.lifecycle = WindowLifecycle::Creating;
        table.windows.insert(key, window);

        debug!(window = %spec.key, "creating");
        Ok(spec)
    }

    /// Whether the creation described by `spec` is still wanted.
    pub fn is_creating(&self, spec: &WindowSpec) -> bool {
        self.table.lock().is_creating(spec)
    }

    /// Commit or roll back a creation once the host has tried to load it.
    ///
    /// Fails with `NotFound` if the window was closed meanwhile; the caller
    /// must then discard any content it loaded.
    pub fn finish_create(
        &self,
        spec: &WindowSpec,
        loaded: std::result::Result<(), String>,
    ) -> Result<WindowSummary> {
        let mut table = self.table.lock();
        if !table.is_creating(spec) {
            return Err(BridgeError::not_found(format!(
                "window '{}' was closed before it finished loading",
                spec.key.id
            )));
        }

        match loaded {
            Ok(()) => {
                let window = table
                    .windows
                    .get_mut(&spec.key)
                    .ok_or_else(|| BridgeError::not_found(spec.key.to_string()))?;
                window.lifecycle = WindowLifecycle::Open;
                info!(window = %spec.key, "window open");
                Ok(window.summary())
            },
            Err(reason) => {
                table.windows.shift_remove(&spec.key);
                Err(BridgeError::LoadError {
                    id: spec.key.id.clone(),
                    reason,
                })
            },
        }
    }

    /// Close `id`. Unknown ids are a no-op; the main window cannot be closed.
    /// Returns the removed window.
    pub fn close(&self, addon: &str, id: &str) -> Result<Option<Window>> {
        if id == MAIN_WINDOW {
            return Err(BridgeError::invalid("the main window cannot be closed"));
        }
        let removed = self
            .table
            .lock()
            .windows
            .shift_remove(&WindowKey::new(addon, id))
            .map(|mut w| {
                w.lifecycle = WindowLifecycle::Closed;
                w
            });
        if let Some(w) = &removed {
            debug!(window = %w.key, "closed");
        }
        Ok(removed)
    }

    /// Remove every window of `addon`, main included.
    pub fn close_all(&self, addon: &str) -> Vec<Window> {
        let mut table = self.table.lock();
        let keys: Vec<WindowKey> = table
            .windows
            .keys()
            .filter(|k| k.addon == addon)
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|k| table.windows.shift_remove(k))
            .map(|mut w| {
                w.lifecycle = WindowLifecycle::Closed;
                w
            })
            .collect()
    }

    pub fn list(&self, addon: &str) -> Vec<WindowSummary> {
        self.table
            .lock()
            .windows
            .values()
            .filter(|w| w.key.addon == addon)
            .map(Window::summary)
            .collect()
    }

    pub fn get(&self, addon: &str, id: &str) -> Option<Window> {
        self.table
            .lock()
            .windows
            .get(&WindowKey::new(addon, id))
            .cloned()
    }

    /// Every window, bottom to top.
    pub fn windows(&self) -> Vec<Window> {
        self.table.lock().windows.values().cloned().collect()
    }

    pub fn set_input_passthrough(
        &self,
        addon: &str,
        id: &str,
        arg: PassthroughArg,
    ) -> Result<PassthroughMode> {
        let mode = PassthroughMode::try_from(arg)?;
        self.with_window(addon, id, |w| {
            w.passthrough = mode;
            Ok(mode)
        })
    }

    pub fn update(&self, addon: &str, id: &str, update: &WindowUpdate) -> Result<WindowSummary> {
        let width = update.width.map(|w| positive("width", w)).transpose()?;
        let height = update.height.map(|h| positive("height", h)).transpose()?;

        self.with_window(addon, id, |w| {
            if let Some(title) = &update.title {
                w.title.clone_from(title);
            }
            if let Some(x) = update.x {
                w.geometry.x = x;
            }
            if let Some(y) = update.y {
                w.geometry.y = y;
            }
            if let Some(width) = width {
                w.geometry.width = width;
            }
            if let Some(height) = height {
                w.geometry.height = height;
            }
            if let Some(visible) = update.visible {
                w.visible = visible;
            }
            Ok(w.summary())
        })
    }

    /// Decide who gets a pointer event at screen position `(x, y)`.
    ///
    /// The topmost visible open window containing the point decides;
    /// `alpha_at` reports the rendered alpha at a window-local position.
    pub fn route_pointer(
        &self,
        x: i32,
        y: i32,
        alpha_at: impl Fn(&WindowKey, i32, i32) -> u8,
    ) -> PointerRoute {
        let table = self.table.lock();
        let Some(window) = table.windows.values().rev().find(|w| {
            w.lifecycle == WindowLifecycle::Open && w.visible && w.geometry.contains(x, y)
        }) else {
            return PointerRoute::PassThrough;
        };

        let (lx, ly) = (x - window.geometry.x, y - window.geometry.y);
        let passes = match window.passthrough {
            PassthroughMode::Off => false,
            PassthroughMode::Full => true,
            mode @ PassthroughMode::AlphaThreshold(_) => {
                mode.passes_through(alpha_at(&window.key, lx, ly))
            },
        };
        if passes {
            PointerRoute::PassThrough
        } else {
            PointerRoute::Window {
                key: window.key.clone(),
                x: lx,
                y: ly,
            }
        }
    }

    fn with_window<T>(
        &self,
        addon: &str,
        id: &str,
        f: impl FnOnce(&mut Window) -> Result<T>,
    ) -> Result<T> {
        let mut table = self.table.lock();
        let window = table
            .windows
            .get_mut(&WindowKey::new(addon, id))
            .ok_or_else(|| BridgeError::not_found(format!("window '{id}'")))?;
        f(window)
    }
}

fn open_window(spec: &WindowSpec, serial: u64) -> Window {
    Window {
        key: spec.key.clone(),
        title: spec.title.clone(),
        geometry: Geometry::new(0, 0, spec.width, spec.height),
        passthrough: PassthroughMode::Off,
        content_source: spec.url.clone(),
        lifecycle: WindowLifecycle::Open,
        visible: true,
        serial,
    }
}
