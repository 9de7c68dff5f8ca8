//! Capability surface.
//!
//! An [`AddonSurface`] is everything one addon's script may touch. Its
//! sub-namespaces mirror the script API (`surface.windows().create(..)` is
//! `nexus.windows.create(..)`), and every addon-chosen identifier passes
//! through the addon's [`Namespace`] before it reaches a shared table.
//!
//! Synchronous operations take effect before they return. Asynchronous ones
//! queue a host task and complete through a [`Resolver`]; the `*_with`
//! variants take the resolver, the plain variants hand back a [`Pending`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::addon::{AddonManifest, Namespace};
use crate::error::{BridgeError, Result};
use crate::events::SubscriptionId;
use crate::gamebinds::GameBind;
use crate::handle::CallbackHandle;
use crate::host::{DirectoryKind, HostTask};
use crate::link::LinkRegionId;
use crate::pending::{pending, Pending, Resolver};
use crate::script::{RequestId, ScriptEngine, ScriptQueue, ScriptSender, ScriptTask};
use crate::window::{PassthroughArg, PassthroughMode, WindowOptions, WindowSummary, WindowUpdate};
use crate::Shared;

/// Script log levels, numbered as the script API sends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Critical = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_number(n: i64) -> Result<Self> {
        match n {
            1 => Ok(Self::Critical),
            2 => Ok(Self::Warning),
            3 => Ok(Self::Info),
            4 => Ok(Self::Debug),
            5 => Ok(Self::Trace),
            _ => Err(BridgeError::invalid(format!("unknown log level {n}"))),
        }
    }
}

pub struct AddonSurface {
    shared: Arc<Shared>,
    manifest: AddonManifest,
    namespace: Namespace,
    sender: ScriptSender,
    queue: ScriptQueue,
}

impl AddonSurface {
    pub(crate) fn new(
        shared: Arc<Shared>,
        manifest: AddonManifest,
        sender: ScriptSender,
        queue: ScriptQueue,
    ) -> Self {
        let namespace = Namespace::new(&shared.config.general.namespace_prefix, &manifest.id);
        Self {
            shared,
            manifest,
            namespace,
            sender,
            queue,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub const fn manifest(&self) -> &AddonManifest {
        &self.manifest
    }

    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.addons.lock().contains_key(self.id())
    }

    /// Run queued deliveries and completions on the caller's (script) context.
    pub fn pump(&self, engine: &mut dyn ScriptEngine) -> usize {
        self.queue.drain(engine)
    }

    /// Like [`AddonSurface::pump`], waiting up to `timeout` for the first task.
    pub fn pump_timeout(&self, engine: &mut dyn ScriptEngine, timeout: Duration) -> usize {
        self.queue.drain_timeout(engine, timeout)
    }

    pub const fn log(&self) -> Log<'_> {
        Log { surface: self }
    }

    pub const fn events(&self) -> Events<'_> {
        Events { surface: self }
    }

    pub const fn keybinds(&self) -> Keybinds<'_> {
        Keybinds { surface: self }
    }

    pub const fn gamebinds(&self) -> GameBinds<'_> {
        GameBinds { surface: self }
    }

    pub const fn datalink(&self) -> DataLink<'_> {
        DataLink { surface: self }
    }

    pub const fn paths(&self) -> Paths<'_> {
        Paths { surface: self }
    }

    pub const fn quickaccess(&self) -> QuickAccessApi<'_> {
        QuickAccessApi { surface: self }
    }

    pub const fn localization(&self) -> LocalizationApi<'_> {
        LocalizationApi { surface: self }
    }

    pub const fn windows(&self) -> Windows<'_> {
        Windows { surface: self }
    }

    /// Show `message` to the user. Fire-and-forget.
    pub fn alert(&self, message: &str) -> Result<()> {
        self.live()?;
        self.shared.submit(HostTask::Alert {
            addon: self.id().to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    fn live(&self) -> Result<()> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(BridgeError::UnknownAddon(self.id().to_string()))
        }
    }

    /// Resolve into a script-queue completion for `request_id`.
    pub(crate) fn responder<T>(&self, request_id: RequestId) -> Resolver<T>
    where
        T: Serialize + Send + 'static,
    {
        let sender = self.sender.clone();
        Resolver::from_fn(move |result: Result<T>| {
            let result = result.and_then(|value| {
                serde_json::to_value(value).map_err(|e| BridgeError::invalid(e.to_string()))
            });
            sender.post(ScriptTask::Response { request_id, result });
        })
    }

    /// Answer `request_id` with `error` through the script queue, for
    /// requests that failed before reaching an operation.
    pub fn reject(&self, request_id: RequestId, error: BridgeError) {
        self.responder::<Value>(request_id).fail(error);
    }

    /// Drop what only the attached script context could use: its event
    /// subscriptions, keybinds, shortcuts and queued deliveries. Windows and
    /// stored chords stay. Returns the number of queued tasks discarded.
    pub fn end_session(&self) -> usize {
        let addon = self.id();
        let shared = &self.shared;
        let subscriptions = shared.events.unsubscribe_all(addon);
        let keybinds = shared.keybinds.deregister_all(addon);
        let shortcuts = shared.quick_access.remove_all(addon);
        let discarded = self.queue.discard();
        debug!(addon, subscriptions, keybinds, shortcuts, discarded, "script session ended");
        discarded
    }

    /// Queue `task` unless the addon is gone, in which case `fail` gets the
    /// error.
    fn submit_or<T>(&self, resolver: Resolver<T>, task: impl FnOnce(Resolver<T>) -> HostTask) {
        match self.live() {
            Ok(()) => self.shared.submit(task(resolver)),
            Err(e) => resolver.fail(e),
        }
    }
}

impl fmt::Debug for AddonSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonSurface")
            .field("addon", &self.manifest.id)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

fn async_call<T: Send + 'static>(f: impl FnOnce(Resolver<T>)) -> Pending<T> {
    let (resolver, pending) = pending();
    f(resolver);
    pending
}

// ── log ──

pub struct Log<'a> {
    surface: &'a AddonSurface,
}

impl Log<'_> {
    pub fn write(&self, level: LogLevel, channel: &str, message: &str) {
        let addon = self.surface.id();
        match level {
            LogLevel::Critical => error!(target: "script", addon, channel, "{}", message),
            LogLevel::Warning => warn!(target: "script", addon, channel, "{}", message),
            LogLevel::Info => info!(target: "script", addon, channel, "{}", message),
            LogLevel::Debug => debug!(target: "script", addon, channel, "{}", message),
            LogLevel::Trace => trace!(target: "script", addon, channel, "{}", message),
        }
    }

    pub fn critical(&self, channel: &str, message: &str) {
        self.write(LogLevel::Critical, channel, message);
    }

    pub fn warning(&self, channel: &str, message: &str) {
        self.write(LogLevel::Warning, channel, message);
    }

    pub fn info(&self, channel: &str, message: &str) {
        self.write(LogLevel::Info, channel, message);
    }

    pub fn debug(&self, channel: &str, message: &str) {
        self.write(LogLevel::Debug, channel, message);
    }

    pub fn trace(&self, channel: &str, message: &str) {
        self.write(LogLevel::Trace, channel, message);
    }
}

// ── events ──

pub struct Events<'a> {
    surface: &'a AddonSurface,
}

impl Events<'_> {
    pub fn subscribe(&self, name: &str, callback: CallbackHandle) -> Result<SubscriptionId> {
        self.surface.live()?;
        self.surface
            .shared
            .events
            .subscribe(self.surface.id(), name, callback)
    }

    pub fn unsubscribe(&self, name: &str, callback: CallbackHandle) -> Result<bool> {
        self.surface.live()?;
        Ok(self
            .surface
            .shared
            .events
            .unsubscribe_callback(self.surface.id(), name, callback))
    }

    /// Remove a subscription by the id `subscribe` returned. Ids of other
    /// addons' subscriptions are not found.
    pub fn unsubscribe_id(&self, id: SubscriptionId) -> Result<bool> {
        self.surface.live()?;
        Ok(self.surface.shared.events.unsubscribe(self.surface.id(), id))
    }

    /// Event names are process-wide; any addon may raise any event.
    pub fn raise(&self, name: &str, payload: Value) -> Result<usize> {
        self.surface.live()?;
        if name.is_empty() {
            return Err(BridgeError::invalid("event name must not be empty"));
        }
        Ok(self.surface.shared.events.raise(name, payload))
    }
}

// ── keybinds ──

pub struct Keybinds<'a> {
    surface: &'a AddonSurface,
}

impl Keybinds<'_> {
    pub fn register(&self, id: &str, default_chord: &str, callback: CallbackHandle) -> Result<()> {
        self.surface.live()?;
        let scoped = self.surface.namespace.scope(id);
        self.surface.shared.keybinds.register(
            self.surface.id(),
            &scoped,
            id,
            default_chord,
            callback,
        )
    }

    pub fn deregister(&self, id: &str) -> Result<bool> {
        self.surface.live()?;
        let scoped = self.surface.namespace.scope(id);
        Ok(self.surface.shared.keybinds.deregister(&scoped))
    }
}

// ── gamebinds ──

pub struct GameBinds<'a> {
    surface: &'a AddonSurface,
}

impl GameBinds<'_> {
    pub fn press(&self, ordinal: i32) -> Result<()> {
        self.surface.live()?;
        let bind = GameBind::try_from_ordinal(ordinal)?;
        self.surface.shared.gamebinds.press(bind);
        Ok(())
    }

    pub fn release(&self, ordinal: i32) -> Result<()> {
        self.surface.live()?;
        let bind = GameBind::try_from_ordinal(ordinal)?;
        self.surface.shared.gamebinds.release(bind);
        Ok(())
    }

    /// Press now, release after `duration_ms` of frame time.
    pub fn invoke(&self, ordinal: i32, duration_ms: u64) -> Result<()> {
        self.surface.live()?;
        let bind = GameBind::try_from_ordinal(ordinal)?;
        let now = self.surface.shared.frame_clock();
        self.surface
            .shared
            .gamebinds
            .invoke(bind, Duration::from_millis(duration_ms), now);
        Ok(())
    }

    pub fn is_bound(&self, ordinal: i32) -> Pending<bool> {
        async_call(|r| self.is_bound_with(ordinal, r))
    }

    pub fn is_bound_with(&self, ordinal: i32, resolver: Resolver<bool>) {
        match GameBind::try_from_ordinal(ordinal) {
            Ok(bind) => self
                .surface
                .submit_or(resolver, |resolver| HostTask::IsBound { bind, resolver }),
            Err(e) => resolver.fail(e),
        }
    }
}

// ── datalink ──

pub struct DataLink<'a> {
    surface: &'a AddonSurface,
}

impl DataLink<'_> {
    pub fn get_mumble_link(&self) -> Pending<Value> {
        async_call(|r| self.read_with(LinkRegionId::Mumble, r))
    }

    pub fn get_nexus_link(&self) -> Pending<Value> {
        async_call(|r| self.read_with(LinkRegionId::Nexus, r))
    }

    pub fn read_with(&self, region: LinkRegionId, resolver: Resolver<Value>) {
        self.surface
            .submit_or(resolver, |resolver| HostTask::ReadLink { region, resolver });
    }
}

// ── paths ──

pub struct Paths<'a> {
    surface: &'a AddonSurface,
}

impl Paths<'_> {
    pub fn game_directory(&self) -> Pending<String> {
        async_call(|r| self.directory_with(DirectoryKind::Game, None, r))
    }

    /// `name` of `None` (or empty) is the addon root.
    pub fn addon_directory(&self, name: Option<&str>) -> Pending<String> {
        async_call(|r| self.directory_with(DirectoryKind::Addon, name, r))
    }

    pub fn common_directory(&self) -> Pending<String> {
        async_call(|r| self.directory_with(DirectoryKind::Common, None, r))
    }

    pub fn directory_with(&self, kind: DirectoryKind, name: Option<&str>, resolver: Resolver<String>) {
        let name = name.filter(|n| !n.is_empty()).map(str::to_string);
        self.surface
            .submit_or(resolver, |resolver| HostTask::Directory {
                kind,
                name,
                resolver,
            });
    }
}

// ── quickaccess ──

pub struct QuickAccessApi<'a> {
    surface: &'a AddonSurface,
}

impl QuickAccessApi<'_> {
    pub fn add(
        &self,
        id: &str,
        icon: &str,
        icon_hover: &str,
        keybind: &str,
        tooltip: &str,
    ) -> Result<()> {
        self.surface.live()?;
        // Checked before scoping; a scoped empty id is not empty.
        for (field, value) in [
            ("id", id),
            ("icon", icon),
            ("iconHover", icon_hover),
            ("keybind", keybind),
        ] {
            if value.is_empty() {
                return Err(BridgeError::invalid(format!("shortcut {field} must not be empty")));
            }
        }
        let ns = &self.surface.namespace;
        self.surface.shared.quick_access.add(
            self.surface.id(),
            &ns.scope(id),
            &ns.scope(icon),
            &ns.scope(icon_hover),
            &ns.scope(keybind),
            tooltip,
        )
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        self.surface.live()?;
        Ok(self
            .surface
            .shared
            .quick_access
            .remove(&self.surface.namespace.scope(id)))
    }

    pub fn notify(&self, id: &str) -> Result<()> {
        self.surface.live()?;
        self.surface
            .shared
            .quick_access
            .notify(&self.surface.namespace.scope(id))
    }
}

// ── localization ──

pub struct LocalizationApi<'a> {
    surface: &'a AddonSurface,
}

impl LocalizationApi<'_> {
    pub fn translate(&self, id: &str) -> Pending<String> {
        async_call(|r| self.translate_with(id, r))
    }

    pub fn translate_with(&self, id: &str, resolver: Resolver<String>) {
        let scoped_id = self.surface.namespace.scope(id);
        let bare_id = id.to_string();
        self.surface
            .submit_or(resolver, |resolver| HostTask::Translate {
                scoped_id,
                bare_id,
                resolver,
            });
    }

    pub fn set(&self, id: &str, language: &str, text: &str) -> Result<()> {
        self.surface.live()?;
        if id.is_empty() {
            return Err(BridgeError::invalid("localization id must not be empty"));
        }
        self.surface
            .shared
            .localization
            .set(&self.surface.namespace.scope(id), language, text)
    }
}

// ── windows ──

pub struct Windows<'a> {
    surface: &'a AddonSurface,
}

impl Windows<'_> {
    pub fn create(&self, id: &str, options: &WindowOptions) -> Pending<WindowSummary> {
        async_call(|r| self.create_with(id, options, r))
    }

    pub fn create_with(&self, id: &str, options: &WindowOptions, resolver: Resolver<WindowSummary>) {
        if let Err(e) = self.surface.live() {
            return resolver.fail(e);
        }
        match self
            .surface
            .shared
            .windows
            .begin_create(self.surface.id(), id, options)
        {
            Ok(spec) => self
                .surface
                .shared
                .submit(HostTask::CreateWindow { spec, resolver }),
            Err(e) => resolver.fail(e),
        }
    }

    /// Unknown ids are a no-op. The main window cannot be closed.
    pub fn close(&self, id: &str) -> Result<()> {
        self.surface.live()?;
        if let Some(window) = self.surface.shared.windows.close(self.surface.id(), id)? {
            self.surface
                .shared
                .submit(HostTask::DestroyWindow { key: window.key });
        }
        Ok(())
    }

    pub fn update(&self, id: &str, update: &WindowUpdate) -> Result<WindowSummary> {
        self.surface.live()?;
        self.surface
            .shared
            .windows
            .update(self.surface.id(), id, update)
    }

    pub fn set_input_passthrough(&self, id: &str, arg: PassthroughArg) -> Result<PassthroughMode> {
        self.surface.live()?;
        self.surface
            .shared
            .windows
            .set_input_passthrough(self.surface.id(), id, arg)
    }

    pub fn list(&self) -> Pending<Vec<WindowSummary>> {
        async_call(|r| self.list_with(r))
    }

    pub fn list_with(&self, resolver: Resolver<Vec<WindowSummary>>) {
        let addon = self.surface.id().to_string();
        self.surface
            .submit_or(resolver, |resolver| HostTask::ListWindows { addon, resolver });
    }
}
