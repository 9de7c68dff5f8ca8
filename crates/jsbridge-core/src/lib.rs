//! jsbridge core: the native side of the `nexus.*` script capability API.
//!
//! This crate owns every table behind the script API (events, keybinds,
//! game binds, link snapshots, overlay windows, quick access, localization)
//! with no dependency on a real game client, browser engine or script engine.
//! Those are reached through two traits:
//!
//! - [`Host`]: the native application, called only from the frame thread.
//! - [`ScriptEngine`]: an addon's script context, called only from
//!   [`AddonSurface::pump`].
//!
//! # Quick Start
//! ```
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use jsbridge_core::config::Config;
//! use jsbridge_core::store::MemoryStore;
//! use jsbridge_core::{AddonManifest, Bridge, CallbackHandle};
//! # use jsbridge_core::{DirectoryKind, GameBind, Host, KeyCode, Modifiers, WindowKey, WindowSpec};
//! # struct NullHost;
//! # impl Host for NullHost {
//! #     fn load_content(&self, _: &WindowSpec) -> Result<(), String> { Ok(()) }
//! #     fn destroy_content(&self, _: &WindowKey) {}
//! #     fn game_bind(&self, _: GameBind, _: bool) {}
//! #     fn forward_key(&self, _: KeyCode, _: Modifiers, _: bool) {}
//! #     fn is_bound(&self, _: GameBind) -> bool { false }
//! #     fn directory(&self, _: DirectoryKind, _: Option<&str>) -> Option<std::path::PathBuf> { None }
//! #     fn alert(&self, _: &str) {}
//! # }
//!
//! let bridge = Bridge::new(Config::default(), Arc::new(NullHost), Arc::new(MemoryStore::new()));
//! let manifest = AddonManifest::from_json(
//!     "demo",
//!     r#"{"name":"Demo","version":"1","author":"me","description":"","entry":"index.html"}"#,
//! )
//! .unwrap();
//!
//! let demo = bridge.load_addon(manifest).unwrap();
//! demo.events().subscribe("greet", CallbackHandle(1)).unwrap();
//! demo.events().raise("greet", serde_json::json!({"hello": "world"})).unwrap();
//!
//! // The host thread runs one frame; the script context drains its queue
//! // with `demo.pump(&mut engine)`.
//! bridge.frame(Instant::now());
//! ```

pub mod addon;
pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod gamebinds;
pub mod handle;
pub mod host;
pub mod input;
pub mod invariants;
pub mod keybinds;
pub mod link;
pub mod localization;
pub mod pending;
pub mod quickaccess;
pub mod script;
pub mod store;
pub mod surface;
pub mod window;

// Re-export primary API types at crate root
pub use addon::{AddonManifest, Namespace};
pub use call::{DispatchMessage, ScriptCall};
pub use error::{BridgeError, Result};
pub use gamebinds::GameBind;
pub use handle::{CallbackHandle, HandleArena};
pub use host::{DirectoryKind, Host};
pub use input::{Chord, KeyCode, Modifiers};
pub use link::{LinkRegionId, LinkWriter};
pub use pending::{Pending, Resolver};
pub use script::{RequestId, ScriptEngine, ScriptError, ScriptTask};
pub use surface::{AddonSurface, LogLevel};
pub use window::{PassthroughArg, PassthroughMode, PointerRoute, WindowKey, WindowSpec};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use addon::validate_addon_id;
use config::Config;
use events::{EventBus, Subscription};
use gamebinds::GameBindDispatcher;
use host::HostTask;
use input::{InputEvent, InputQueue};
use invariants::BridgeSnapshot;
use keybinds::{Keybind, KeybindRegistry};
use link::LinkBridge;
use localization::Localization;
use quickaccess::{QuickAccess, Shortcut};
use script::{script_queue, ScriptRoutes};
use store::KeyValueStore;
use window::{Window, WindowManager};

/// State shared by the bridge and every addon surface.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) routes: Arc<ScriptRoutes>,
    pub(crate) events: EventBus,
    pub(crate) keybinds: KeybindRegistry,
    pub(crate) gamebinds: GameBindDispatcher,
    pub(crate) links: LinkBridge,
    pub(crate) windows: WindowManager,
    pub(crate) quick_access: QuickAccess,
    pub(crate) localization: Localization,
    pub(crate) input: InputQueue,
    pub(crate) addons: Mutex<IndexMap<String, AddonManifest>>,
    /// Held across addon load and unload so those appear atomic.
    lifecycle: Mutex<()>,
    tasks_tx: Sender<HostTask>,
    tasks_rx: Receiver<HostTask>,
    clock: Mutex<Instant>,
    shut_down: AtomicBool,
}

impl Shared {
    pub(crate) fn submit(&self, task: HostTask) {
        // Both ends live in self, so the channel cannot be disconnected.
        let _ = self.tasks_tx.send(task);
    }

    /// Time of the current frame, used to schedule game-bind releases.
    pub(crate) fn frame_clock(&self) -> Instant {
        *self.clock.lock()
    }
}

/// What one [`Bridge::frame`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Game-bind releases that came due this frame.
    pub released: usize,
    /// Input events drained, physical and synthesized.
    pub input_events: usize,
    /// Key events a keybind consumed instead of the game.
    pub keys_consumed: usize,
    /// Host tasks run.
    pub tasks: usize,
}

/// The host bridge runtime.
///
/// Owned by the host. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    pub fn new(config: Config, host: Arc<dyn Host>, store: Arc<dyn KeyValueStore>) -> Self {
        let routes = Arc::new(ScriptRoutes::new());
        let input = InputQueue::new();
        let (tasks_tx, tasks_rx) = crossbeam_channel::unbounded();

        let shared = Shared {
            events: EventBus::new(Arc::clone(&routes), config.events.max_subscriptions_per_addon),
            keybinds: KeybindRegistry::new(
                Arc::clone(&routes),
                Arc::clone(&store),
                config.keybinds.conflict_policy,
            ),
            gamebinds: GameBindDispatcher::new(input.clone()),
            links: LinkBridge::new(),
            windows: WindowManager::new(
                config.windows.default_width,
                config.windows.default_height,
            ),
            quick_access: QuickAccess::new(),
            localization: Localization::new(store, &config.general.language),
            input,
            addons: Mutex::new(IndexMap::new()),
            lifecycle: Mutex::new(()),
            tasks_tx,
            tasks_rx,
            clock: Mutex::new(Instant::now()),
            shut_down: AtomicBool::new(false),
            routes,
            host,
            config,
        };

        info!(
            prefix = %shared.config.general.namespace_prefix,
            policy = ?shared.config.keybinds.conflict_policy,
            "bridge ready"
        );
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    // ── Addon lifecycle ──────────────────────────────────────────────

    /// Load an addon: open its main window and hand back its surface.
    ///
    /// The main window's content is loaded synchronously through
    /// [`Host::load_content`]; if that fails nothing of the addon remains.
    pub fn load_addon(&self, manifest: AddonManifest) -> Result<AddonSurface> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(BridgeError::Shutdown);
        }
        validate_addon_id(&manifest.id).map_err(|e| BridgeError::invalid(e.to_string()))?;

        let _lifecycle = self.shared.lifecycle.lock();
        if self.shared.addons.lock().contains_key(&manifest.id) {
            return Err(BridgeError::invalid(format!(
                "addon '{}' is already loaded",
                manifest.id
            )));
        }

        let spec = self
            .shared
            .windows
            .main_spec(&manifest.id, &manifest.name, &manifest.entry);
        self.shared
            .host
            .load_content(&spec)
            .map_err(|reason| BridgeError::LoadError {
                id: spec.key.id.clone(),
                reason,
            })?;
        self.shared.windows.insert_main(&spec);

        let (sender, queue) = script_queue(&manifest.id);
        self.shared.routes.insert(sender.clone());
        self.shared
            .addons
            .lock()
            .insert(manifest.id.clone(), manifest.clone());

        info!(addon = %manifest.id, version = %manifest.version, "addon loaded");
        Ok(AddonSurface::new(
            Arc::clone(&self.shared),
            manifest,
            sender,
            queue,
        ))
    }

    /// Tear down everything `addon` owns: subscriptions, keybinds, shortcuts
    /// and windows (main included). Outstanding async work resolves with an
    /// error; queued script tasks are discarded with the surface.
    pub fn unload_addon(&self, addon: &str) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock();
        if self.shared.addons.lock().shift_remove(addon).is_none() {
            return Err(BridgeError::UnknownAddon(addon.to_string()));
        }

        self.shared.routes.remove(addon);
        let subscriptions = self.shared.events.unsubscribe_all(addon);
        let keybinds = self.shared.keybinds.deregister_all(addon);
        let shortcuts = self.shared.quick_access.remove_all(addon);
        let windows = self.shared.windows.close_all(addon);
        let window_count = windows.len();
        for window in windows {
            self.shared.submit(HostTask::DestroyWindow { key: window.key });
        }

        info!(
            addon,
            subscriptions, keybinds, shortcuts, windows = window_count, "addon unloaded"
        );
        Ok(())
    }

    pub fn is_loaded(&self, addon: &str) -> bool {
        self.shared.addons.lock().contains_key(addon)
    }

    /// Loaded addons in load order.
    pub fn addons(&self) -> Vec<AddonManifest> {
        self.shared.addons.lock().values().cloned().collect()
    }

    /// Unload every addon and fail all queued work with `Shutdown`.
    /// Window teardown still reaches the host.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let ids: Vec<String> = self.shared.addons.lock().keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.unload_addon(&id) {
                debug!(addon = %id, "unload during shutdown: {}", e);
            }
        }
        for task in self.shared.tasks_rx.try_iter() {
            if let HostTask::DestroyWindow { key } = task {
                self.shared.host.destroy_content(&key);
            }
        }
        info!("bridge shut down");
    }

    // ── Frame loop (host thread) ─────────────────────────────────────

    /// Run one host frame: due game-bind releases, then input in enqueue
    /// order, then queued host tasks.
    pub fn frame(&self, now: Instant) -> FrameStats {
        *self.shared.clock.lock() = now;
        let mut stats = FrameStats {
            released: self.shared.gamebinds.release_due(now),
            ..FrameStats::default()
        };

        for event in self.shared.input.drain() {
            stats.input_events += 1;
            match event {
                InputEvent::Key {
                    key,
                    modifiers,
                    pressed,
                } => {
                    if self.shared.keybinds.handle_key(key, modifiers, pressed) {
                        stats.keys_consumed += 1;
                    } else {
                        self.shared.host.forward_key(key, modifiers, pressed);
                    }
                },
                InputEvent::GameBind { bind, pressed } => {
                    self.shared.host.game_bind(bind, pressed);
                },
            }
        }

        // Tasks queued by this frame's own work wait for the next one.
        let queued = self.shared.tasks_rx.len();
        for task in self.shared.tasks_rx.try_iter().take(queued) {
            self.run_task(task);
            stats.tasks += 1;
        }

        #[cfg(debug_assertions)]
        if let Err(e) = invariants::validate(&self.snapshot()) {
            tracing::warn!("Invariant violation after frame: {}", e);
        }

        stats
    }

    fn run_task(&self, task: HostTask) {
        let shared = &self.shared;
        match task {
            HostTask::CreateWindow { spec, resolver } => {
                if !shared.windows.is_creating(&spec) {
                    return resolver.fail(BridgeError::not_found(format!(
                        "window '{}' was closed before it finished loading",
                        spec.key.id
                    )));
                }
                if !self.is_loaded(&spec.key.addon) {
                    // Raced with unload; drop the reservation.
                    let _ = shared.windows.finish_create(&spec, Err("addon unloaded".into()));
                    return resolver.fail(BridgeError::UnknownAddon(spec.key.addon.clone()));
                }

                let loaded = shared.host.load_content(&spec);
                let content_exists = loaded.is_ok();
                let result = shared.windows.finish_create(&spec, loaded);
                if let Err(e) = &result {
                    if content_exists {
                        shared.host.destroy_content(&spec.key);
                    }
                    debug!(window = %spec.key, "create failed: {}", e);
                }
                resolver.resolve(result);
            },
            HostTask::DestroyWindow { key } => shared.host.destroy_content(&key),
            HostTask::ListWindows { addon, resolver } => {
                resolver.succeed(shared.windows.list(&addon));
            },
            HostTask::ReadLink { region, resolver } => {
                resolver.succeed(shared.links.snapshot(region).decode());
            },
            HostTask::IsBound { bind, resolver } => resolver.succeed(shared.host.is_bound(bind)),
            HostTask::Directory {
                kind,
                name,
                resolver,
            } => {
                let path = shared
                    .host
                    .directory(kind, name.as_deref())
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                resolver.succeed(path);
            },
            HostTask::Translate {
                scoped_id,
                bare_id,
                resolver,
            } => resolver.succeed(shared.localization.translate(&scoped_id, &bare_id)),
            HostTask::Alert { addon, message } => {
                info!(addon = %addon, "alert: {}", message);
                shared.host.alert(&message);
            },
        }
    }

    // ── Host-side entry points ───────────────────────────────────────

    /// Queue a physical key transition for the next frame.
    pub fn push_key(&self, key: KeyCode, modifiers: Modifiers, pressed: bool) {
        self.shared.input.push(InputEvent::Key {
            key,
            modifiers,
            pressed,
        });
    }

    /// Raise an event on behalf of the host. Returns the number of
    /// deliveries queued.
    pub fn raise_event(&self, name: &str, payload: Value) -> usize {
        self.shared.events.raise(name, payload)
    }

    /// User-settings rebind; persisted through the key-value store.
    pub fn rebind_keybind(&self, identifier: &str, chord: &str) -> Result<()> {
        self.shared.keybinds.rebind(identifier, chord)
    }

    pub fn link_writer(&self, region: LinkRegionId) -> LinkWriter {
        self.shared.links.writer(region)
    }

    pub fn set_language(&self, language: &str) {
        self.shared.localization.set_language(language);
    }

    pub fn route_pointer(
        &self,
        x: i32,
        y: i32,
        alpha_at: impl Fn(&WindowKey, i32, i32) -> u8,
    ) -> PointerRoute {
        self.shared.windows.route_pointer(x, y, alpha_at)
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Every window, bottom to top.
    pub fn windows(&self) -> Vec<Window> {
        self.shared.windows.windows()
    }

    pub fn keybinds(&self) -> Vec<Keybind> {
        self.shared.keybinds.keybinds()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.events.subscriptions()
    }

    pub fn shortcuts(&self) -> Vec<Shortcut> {
        self.shared.quick_access.list()
    }

    pub fn pending_tasks(&self) -> usize {
        self.shared.tasks_rx.len()
    }

    /// Consistent copy of the tables, taken between addon loads and unloads.
    pub fn snapshot(&self) -> BridgeSnapshot {
        let _lifecycle = self.shared.lifecycle.lock();
        BridgeSnapshot {
            addons: self.shared.addons.lock().keys().cloned().collect(),
            windows: self.shared.windows.windows(),
            keybinds: self.shared.keybinds.keybinds(),
            subscriptions: self.shared.events.subscriptions(),
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("addons", &self.shared.addons.lock().len())
            .field("pending_tasks", &self.shared.tasks_rx.len())
            .finish_non_exhaustive()
    }
}
