//! Core-only integration tests.
//!
//! These tests drive jsbridge-core through its public API with an in-memory
//! host and a recording script engine. No socket, browser or game client is
//! involved.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};

use jsbridge_core::call::parse_call;
use jsbridge_core::config::Config;
use jsbridge_core::link::{MumbleLink, NexusLink};
use jsbridge_core::pending::pending;
use jsbridge_core::store::MemoryStore;
use jsbridge_core::window::{WindowOptions, WindowUpdate};
use jsbridge_core::{
    AddonManifest, AddonSurface, Bridge, BridgeError, CallbackHandle, DirectoryKind, GameBind,
    Host, KeyCode, LinkRegionId, Modifiers, PassthroughArg, PassthroughMode, RequestId,
    ScriptEngine, ScriptError, WindowKey, WindowSpec,
};

/// Host that records every call in order.
#[derive(Default)]
struct TestHost {
    log: Mutex<Vec<String>>,
}

impl TestHost {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }
}

impl Host for TestHost {
    fn load_content(&self, spec: &WindowSpec) -> Result<(), String> {
        if spec.url.contains("missing") {
            return Err(format!("{} not found", spec.url));
        }
        self.log.lock().push(format!("load {}", spec.key));
        Ok(())
    }

    fn destroy_content(&self, key: &WindowKey) {
        self.log.lock().push(format!("destroy {key}"));
    }

    fn game_bind(&self, bind: GameBind, pressed: bool) {
        let edge = if pressed { "down" } else { "up" };
        self.log.lock().push(format!("bind {} {edge}", bind.ordinal()));
    }

    fn forward_key(&self, key: KeyCode, _modifiers: Modifiers, pressed: bool) {
        let edge = if pressed { "down" } else { "up" };
        self.log.lock().push(format!("key {} {edge}", key.name()));
    }

    fn is_bound(&self, bind: GameBind) -> bool {
        bind == GameBind::Jump
    }

    fn directory(&self, kind: DirectoryKind, name: Option<&str>) -> Option<PathBuf> {
        match kind {
            DirectoryKind::Game => Some(PathBuf::from("/games/gw2")),
            DirectoryKind::Addon => Some(PathBuf::from("/addons").join(name.unwrap_or(""))),
            DirectoryKind::Common => None,
        }
    }

    fn alert(&self, message: &str) {
        self.log.lock().push(format!("alert {message}"));
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Delivery {
    Event(CallbackHandle, String, Value),
    Keybind(CallbackHandle, String, bool),
    Response(RequestId, Result<Value, BridgeError>),
}

/// Script engine that records deliveries; callbacks in `failing` error out.
#[derive(Default)]
struct Recorder {
    seen: Vec<Delivery>,
    failing: BTreeSet<u64>,
}

impl ScriptEngine for Recorder {
    fn call_event(
        &mut self,
        callback: CallbackHandle,
        name: &str,
        payload: &Value,
    ) -> Result<(), ScriptError> {
        if self.failing.contains(&callback.0) {
            return Err(ScriptError(format!("{callback} threw")));
        }
        self.seen
            .push(Delivery::Event(callback, name.to_string(), payload.clone()));
        Ok(())
    }

    fn call_keybind(
        &mut self,
        callback: CallbackHandle,
        identifier: &str,
        is_release: bool,
    ) -> Result<(), ScriptError> {
        self.seen
            .push(Delivery::Keybind(callback, identifier.to_string(), is_release));
        Ok(())
    }

    fn complete(
        &mut self,
        request_id: RequestId,
        result: Result<Value, BridgeError>,
    ) -> Result<(), ScriptError> {
        self.seen.push(Delivery::Response(request_id, result));
        Ok(())
    }
}

fn manifest(id: &str) -> AddonManifest {
    AddonManifest::from_json(
        id,
        r#"{"name":"Test","version":"1.0.0","author":"tests","description":"","entry":"index.html"}"#,
    )
    .unwrap()
}

/// Helper: a manifest whose id has not been validated yet.
fn manifest_unchecked(id: &str) -> AddonManifest {
    let mut manifest = manifest("placeholder");
    manifest.id = id.to_string();
    manifest
}

/// Helper: a bridge with default config and a recording host.
fn test_bridge() -> (Bridge, Arc<TestHost>) {
    let host = Arc::new(TestHost::default());
    let bridge = Bridge::new(Config::default(), host.clone(), Arc::new(MemoryStore::new()));
    (bridge, host)
}

fn load(bridge: &Bridge, id: &str) -> AddonSurface {
    bridge.load_addon(manifest(id)).unwrap()
}

fn options(url: &str) -> WindowOptions {
    WindowOptions {
        url: url.to_string(),
        width: Some(400),
        height: Some(300),
        title: None,
    }
}

// ── Test 1: event fan-out ────────────────────────────────────────

#[test]
fn raise_without_subscribers_is_a_noop() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    assert_eq!(demo.events().raise("nobody-listens", json!(1)).unwrap(), 0);
    let mut engine = Recorder::default();
    assert_eq!(demo.pump(&mut engine), 0);
}

#[test]
fn raise_reaches_every_subscriber_once_in_subscribe_order() {
    let (bridge, _host) = test_bridge();
    let a = load(&bridge, "a");
    let b = load(&bridge, "b");

    a.events().subscribe("ping", CallbackHandle(1)).unwrap();
    b.events().subscribe("ping", CallbackHandle(2)).unwrap();
    a.events().subscribe("ping", CallbackHandle(3)).unwrap();

    assert_eq!(b.events().raise("ping", json!({"n": 1})).unwrap(), 3);

    let mut engine = Recorder::default();
    a.pump(&mut engine);
    assert_eq!(
        engine.seen,
        vec![
            Delivery::Event(CallbackHandle(1), "ping".into(), json!({"n": 1})),
            Delivery::Event(CallbackHandle(3), "ping".into(), json!({"n": 1})),
        ]
    );

    let mut engine = Recorder::default();
    b.pump(&mut engine);
    assert_eq!(
        engine.seen,
        vec![Delivery::Event(CallbackHandle(2), "ping".into(), json!({"n": 1}))]
    );
}

#[test]
fn late_subscriber_misses_in_flight_raise() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    demo.events().subscribe("tick", CallbackHandle(1)).unwrap();

    bridge.raise_event("tick", Value::Null);
    demo.events().subscribe("tick", CallbackHandle(2)).unwrap();

    let mut engine = Recorder::default();
    demo.pump(&mut engine);
    assert_eq!(
        engine.seen,
        vec![Delivery::Event(CallbackHandle(1), "tick".into(), Value::Null)]
    );
}

#[test]
fn failing_handler_does_not_stop_others() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    for cb in 1..=3 {
        demo.events().subscribe("boom", CallbackHandle(cb)).unwrap();
    }
    demo.events().raise("boom", Value::Null).unwrap();

    let mut engine = Recorder {
        failing: BTreeSet::from([2]),
        ..Recorder::default()
    };
    assert_eq!(demo.pump(&mut engine), 3);
    let delivered: Vec<_> = engine
        .seen
        .iter()
        .map(|d| match d {
            Delivery::Event(cb, ..) => cb.0,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(delivered, vec![1, 3]);
}

#[test]
fn unsubscribe_by_name_and_callback() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    demo.events().subscribe("ping", CallbackHandle(1)).unwrap();
    assert!(demo.events().unsubscribe("ping", CallbackHandle(1)).unwrap());
    assert!(!demo.events().unsubscribe("ping", CallbackHandle(1)).unwrap());
    assert_eq!(demo.events().raise("ping", Value::Null).unwrap(), 0);
}

#[test]
fn unsubscribe_by_subscription_id() {
    let (bridge, _host) = test_bridge();
    let a = load(&bridge, "a");
    let b = load(&bridge, "b");
    let first = a.events().subscribe("ping", CallbackHandle(1)).unwrap();
    a.events().subscribe("ping", CallbackHandle(2)).unwrap();

    // Only the owner can remove a subscription.
    assert!(!b.events().unsubscribe_id(first).unwrap());
    assert!(a.events().unsubscribe_id(first).unwrap());
    assert!(!a.events().unsubscribe_id(first).unwrap());

    a.events().raise("ping", Value::Null).unwrap();
    let mut engine = Recorder::default();
    a.pump(&mut engine);
    assert_eq!(
        engine.seen,
        vec![Delivery::Event(CallbackHandle(2), "ping".into(), Value::Null)]
    );
}

// ── Test 2: input passthrough ────────────────────────────────────

#[test]
fn passthrough_last_setting_wins() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    demo.windows()
        .set_input_passthrough("main", PassthroughArg::Toggle(true))
        .unwrap();
    demo.windows()
        .set_input_passthrough("main", PassthroughArg::Threshold(10))
        .unwrap();

    let main = &bridge.windows()[0];
    assert_eq!(main.passthrough, PassthroughMode::AlphaThreshold(10));
}

#[test]
fn passthrough_out_of_range_leaves_state_unchanged() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    demo.windows()
        .set_input_passthrough("main", PassthroughArg::Toggle(true))
        .unwrap();

    for bad in [300, -1] {
        assert!(matches!(
            demo.windows()
                .set_input_passthrough("main", PassthroughArg::Threshold(bad)),
            Err(BridgeError::InvalidArgument(_))
        ));
    }
    assert_eq!(bridge.windows()[0].passthrough, PassthroughMode::Full);
}

// ── Test 3: window lifecycle ─────────────────────────────────────

#[test]
fn duplicate_window_fails_and_keeps_original() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    let first = demo.windows().create("w1", &options("panel.html"));
    bridge.frame(Instant::now());
    let summary = first.wait().unwrap();
    assert_eq!(summary.url, "https://demo.jsloader.local/panel.html");

    let second = demo.windows().create("w1", &options("other.html"));
    assert_eq!(
        second.try_take(),
        Some(Err(BridgeError::DuplicateWindow("w1".into())))
    );

    bridge.frame(Instant::now());
    let list = demo.windows().list();
    bridge.frame(Instant::now());
    let list = list.wait().unwrap();
    let w1 = list.iter().find(|w| w.id == "w1").unwrap();
    assert_eq!(w1.url, "https://demo.jsloader.local/panel.html");
    assert_eq!((w1.width, w1.height), (400, 300));
}

#[test]
fn close_unknown_is_a_noop_and_main_cannot_close() {
    let (bridge, host) = test_bridge();
    let demo = load(&bridge, "demo");
    host.take();

    demo.windows().close("ghost").unwrap();
    assert!(matches!(
        demo.windows().close("main"),
        Err(BridgeError::InvalidArgument(_))
    ));

    let list = demo.windows().list();
    bridge.frame(Instant::now());
    let ids: Vec<String> = list.wait().unwrap().into_iter().map(|w| w.id).collect();
    assert_eq!(ids, vec!["main".to_string()]);
    assert!(host.take().is_empty());
}

#[test]
fn closed_id_can_be_reused() {
    let (bridge, host) = test_bridge();
    let demo = load(&bridge, "demo");

    let first = demo.windows().create("w1", &options("a.html"));
    bridge.frame(Instant::now());
    first.wait().unwrap();

    demo.windows().close("w1").unwrap();
    let second = demo.windows().create("w1", &options("b.html"));
    bridge.frame(Instant::now());
    assert_eq!(second.wait().unwrap().url, "https://demo.jsloader.local/b.html");

    let log = host.take();
    let tail = &log[log.len() - 3..];
    assert_eq!(tail, ["load demo/w1", "destroy demo/w1", "load demo/w1"]);
}

#[test]
fn window_closed_while_creating_resolves_not_found() {
    let (bridge, host) = test_bridge();
    let demo = load(&bridge, "demo");
    host.take();

    let created = demo.windows().create("w1", &options("panel.html"));
    demo.windows().close("w1").unwrap();
    bridge.frame(Instant::now());

    assert!(matches!(created.wait(), Err(BridgeError::NotFound(_))));
    assert_eq!(host.take(), vec!["destroy demo/w1".to_string()]);
    assert!(bridge.windows().iter().all(|w| w.key.id != "w1"));
}

#[test]
fn unresolvable_content_leaves_no_entry() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    let created = demo.windows().create("w1", &options("missing.html"));
    bridge.frame(Instant::now());
    assert!(matches!(created.wait(), Err(BridgeError::LoadError { .. })));
    assert_eq!(bridge.windows().len(), 1);
}

#[test]
fn concurrent_create_exactly_one_wins() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    let pendings: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| s.spawn(|| demo.windows().create("w1", &options("panel.html"))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    bridge.frame(Instant::now());

    let results: Vec<_> = pendings.into_iter().map(|p| p.wait()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(BridgeError::DuplicateWindow(_))))
            .count(),
        1
    );
}

#[test]
fn update_validates_before_applying() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    let bad = WindowUpdate {
        title: Some("renamed".into()),
        width: Some(0),
        ..WindowUpdate::default()
    };
    assert!(matches!(
        demo.windows().update("main", &bad),
        Err(BridgeError::InvalidArgument(_))
    ));
    assert_eq!(bridge.windows()[0].title, "Test");

    let good = WindowUpdate {
        title: Some("renamed".into()),
        visible: Some(false),
        ..WindowUpdate::default()
    };
    let summary = demo.windows().update("main", &good).unwrap();
    assert_eq!(summary.title, "renamed");
    assert!(!summary.visible);

    assert!(matches!(
        demo.windows().update("ghost", &good),
        Err(BridgeError::NotFound(_))
    ));
}

// ── Test 4: link bridge ──────────────────────────────────────────

#[test]
fn link_reads_zeroed_before_population() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    let mumble = demo.datalink().get_mumble_link();
    let nexus = demo.datalink().get_nexus_link();
    bridge.frame(Instant::now());

    assert_eq!(
        mumble.wait().unwrap(),
        serde_json::to_value(MumbleLink::default()).unwrap()
    );
    assert_eq!(
        nexus.wait().unwrap(),
        serde_json::to_value(NexusLink::default()).unwrap()
    );
}

#[test]
fn link_reads_latest_publication() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    let writer = bridge.link_writer(LinkRegionId::Nexus);

    let first = NexusLink {
        width: 1920,
        height: 1080,
        scaling: 1.0,
        is_gameplay: true,
        ..NexusLink::default()
    };
    assert_eq!(writer.publish(&first.to_bytes()), 1);
    let second = NexusLink {
        width: 2560,
        ..first.clone()
    };
    assert_eq!(writer.publish(&second.to_bytes()), 2);

    let read = demo.datalink().get_nexus_link();
    bridge.frame(Instant::now());
    let value = read.wait().unwrap();
    assert_eq!(value["width"], json!(2560));
    assert_eq!(value["isGameplay"], json!(true));
}

// ── Test 5: keybinds ─────────────────────────────────────────────

#[test]
fn release_follows_press_across_rebind() {
    let (bridge, host) = test_bridge();
    let demo = load(&bridge, "demo");
    demo.keybinds()
        .register("toggle", "CTRL+K", CallbackHandle(1))
        .unwrap();
    demo.keybinds().register("other", "", CallbackHandle(2)).unwrap();

    bridge.push_key(KeyCode::K, Modifiers::CTRL, true);
    bridge.frame(Instant::now());

    let toggle = demo.namespace().scope("toggle");
    let other = demo.namespace().scope("other");
    bridge.rebind_keybind(&toggle, "").unwrap();
    bridge.rebind_keybind(&other, "CTRL+K").unwrap();

    bridge.push_key(KeyCode::K, Modifiers::CTRL, false);
    bridge.push_key(KeyCode::K, Modifiers::CTRL, true);
    bridge.frame(Instant::now());

    let mut engine = Recorder::default();
    demo.pump(&mut engine);
    assert_eq!(
        engine.seen,
        vec![
            Delivery::Keybind(CallbackHandle(1), "toggle".into(), false),
            Delivery::Keybind(CallbackHandle(1), "toggle".into(), true),
            Delivery::Keybind(CallbackHandle(2), "other".into(), false),
        ]
    );
    assert!(host.take().iter().all(|l| !l.starts_with("key")));
}

#[test]
fn unmatched_keys_are_forwarded() {
    let (bridge, host) = test_bridge();
    let demo = load(&bridge, "demo");
    demo.keybinds()
        .register("toggle", "CTRL+K", CallbackHandle(1))
        .unwrap();
    host.take();

    bridge.push_key(KeyCode::K, Modifiers::empty(), true);
    let stats = bridge.frame(Instant::now());
    assert_eq!(stats.keys_consumed, 0);
    assert_eq!(host.take(), vec!["key K down".to_string()]);
}

#[test]
fn identifiers_are_namespaced_per_addon() {
    let (bridge, _host) = test_bridge();
    let a = load(&bridge, "a");
    let b = load(&bridge, "b");

    a.keybinds().register("toggle", "CTRL+1", CallbackHandle(1)).unwrap();
    b.keybinds().register("toggle", "CTRL+2", CallbackHandle(1)).unwrap();

    let ids: BTreeSet<String> = bridge.keybinds().into_iter().map(|k| k.identifier).collect();
    assert_eq!(
        ids,
        BTreeSet::from(["JSLOADER_a_toggle".to_string(), "JSLOADER_b_toggle".to_string()])
    );

    assert!(!b.keybinds().deregister("missing").unwrap());
    assert!(b.keybinds().deregister("toggle").unwrap());
    assert_eq!(bridge.keybinds().len(), 1);
}

#[test]
fn addon_ids_cannot_forge_another_namespace() {
    let (bridge, _host) = test_bridge();
    let a = load(&bridge, "a");
    assert!(matches!(
        bridge.load_addon(manifest_unchecked("a_b")),
        Err(BridgeError::InvalidArgument(_))
    ));

    let ab = load(&bridge, "a-b");
    a.quickaccess().add("b_x", "i", "h", "k", "from a").unwrap();
    ab.quickaccess().add("x", "i", "h", "k", "from a-b").unwrap();
    a.keybinds().register("b_y", "CTRL+1", CallbackHandle(1)).unwrap();
    ab.keybinds().register("y", "CTRL+2", CallbackHandle(2)).unwrap();

    let shortcuts: BTreeSet<(String, String)> = bridge
        .shortcuts()
        .into_iter()
        .map(|s| (s.id, s.addon))
        .collect();
    assert_eq!(
        shortcuts,
        BTreeSet::from([
            ("JSLOADER_a_b_x".to_string(), "a".to_string()),
            ("JSLOADER_a-b_x".to_string(), "a-b".to_string()),
        ])
    );
    assert_eq!(bridge.keybinds().len(), 2);
}

#[test]
fn rebind_persists_across_reload() {
    let host = Arc::new(TestHost::default());
    let store = Arc::new(MemoryStore::new());
    let bridge = Bridge::new(Config::default(), host, store);

    let demo = load(&bridge, "demo");
    demo.keybinds()
        .register("toggle", "CTRL+K", CallbackHandle(1))
        .unwrap();
    bridge
        .rebind_keybind(&demo.namespace().scope("toggle"), "ALT+J")
        .unwrap();

    bridge.unload_addon("demo").unwrap();
    let demo = load(&bridge, "demo");
    demo.keybinds()
        .register("toggle", "CTRL+K", CallbackHandle(5))
        .unwrap();
    let bind = &bridge.keybinds()[0];
    assert_eq!(bind.current_chord.map(|c| c.to_string()), Some("ALT+J".to_string()));
}

// ── Test 6: game binds ───────────────────────────────────────────

#[test]
fn synthesized_and_physical_input_keep_enqueue_order() {
    let (bridge, host) = test_bridge();
    let demo = load(&bridge, "demo");
    host.take();

    bridge.push_key(KeyCode::W, Modifiers::empty(), true);
    demo.gamebinds().press(GameBind::Jump.ordinal()).unwrap();
    bridge.push_key(KeyCode::W, Modifiers::empty(), false);
    demo.gamebinds().release(GameBind::Jump.ordinal()).unwrap();
    bridge.frame(Instant::now());

    assert_eq!(
        host.take(),
        vec!["key W down", "bind 9 down", "key W up", "bind 9 up"]
    );
}

#[test]
fn unknown_game_bind_ordinal_rejected() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    assert!(matches!(
        demo.gamebinds().press(9999),
        Err(BridgeError::InvalidArgument(_))
    ));

    let bound = demo.gamebinds().is_bound(-3);
    assert!(matches!(bound.try_take(), Some(Err(BridgeError::InvalidArgument(_)))));
}

#[test]
fn is_bound_answers_from_host() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    let jump = demo.gamebinds().is_bound(GameBind::Jump.ordinal());
    let dodge = demo.gamebinds().is_bound(GameBind::Dodge.ordinal());
    bridge.frame(Instant::now());
    assert_eq!(jump.wait(), Ok(true));
    assert_eq!(dodge.wait(), Ok(false));
}

#[test]
fn invoke_releases_after_duration() {
    let (bridge, host) = test_bridge();
    let demo = load(&bridge, "demo");
    let start = Instant::now();
    bridge.frame(start);
    host.take();

    demo.gamebinds().invoke(GameBind::Dodge.ordinal(), 250).unwrap();
    bridge.frame(start + Duration::from_millis(100));
    bridge.frame(start + Duration::from_millis(300));
    assert_eq!(host.take(), vec!["bind 6 down", "bind 6 up"]);
}

// ── Test 7: paths, localization, quick access ────────────────────

#[test]
fn directory_lookups_resolve_strings() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    let game = demo.paths().game_directory();
    let addon = demo.paths().addon_directory(Some("demo"));
    let common = demo.paths().common_directory();
    bridge.frame(Instant::now());

    assert_eq!(game.wait().unwrap(), "/games/gw2");
    assert_eq!(addon.wait().unwrap(), "/addons/demo");
    assert_eq!(common.wait().unwrap(), "");
}

#[test]
fn translate_prefers_addon_override() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    demo.localization().set("greeting", "en", "Hello").unwrap();
    let hit = demo.localization().translate("greeting");
    let miss = demo.localization().translate("farewell");
    bridge.frame(Instant::now());

    assert_eq!(hit.wait().unwrap(), "Hello");
    assert_eq!(miss.wait().unwrap(), "farewell");
}

#[test]
fn quick_access_is_scoped_and_validated() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    assert!(matches!(
        demo.quickaccess().add("", "icon", "hover", "kb", "tip"),
        Err(BridgeError::InvalidArgument(_))
    ));
    demo.quickaccess()
        .add("shortcut", "icon", "hover", "kb", "Open demo")
        .unwrap();
    demo.quickaccess().notify("shortcut").unwrap();

    let shortcuts = bridge.shortcuts();
    assert_eq!(shortcuts.len(), 1);
    assert_eq!(shortcuts[0].id, "JSLOADER_demo_shortcut");
    assert_eq!(shortcuts[0].keybind, "JSLOADER_demo_kb");
    assert_eq!(shortcuts[0].notifications, 1);

    assert!(matches!(
        demo.quickaccess().notify("ghost"),
        Err(BridgeError::NotFound(_))
    ));
    assert!(demo.quickaccess().remove("shortcut").unwrap());
    assert!(bridge.shortcuts().is_empty());
}

// ── Test 8: resolution guarantees and unload ─────────────────────

#[test]
fn dropped_resolver_yields_shutdown() {
    let (resolver, pending) = pending::<bool>();
    drop(resolver);
    assert_eq!(pending.wait(), Err(BridgeError::Shutdown));
}

#[test]
fn shutdown_fails_outstanding_requests() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    let listed = demo.windows().list();
    bridge.shutdown();
    assert_eq!(listed.wait(), Err(BridgeError::Shutdown));
}

#[test]
fn unload_removes_all_addon_state() {
    let (bridge, host) = test_bridge();
    let demo = load(&bridge, "demo");
    let other = load(&bridge, "other");

    demo.events().subscribe("ping", CallbackHandle(1)).unwrap();
    other.events().subscribe("ping", CallbackHandle(1)).unwrap();
    demo.keybinds().register("toggle", "CTRL+K", CallbackHandle(2)).unwrap();
    demo.quickaccess().add("s", "i", "h", "k", "t").unwrap();
    let w1 = demo.windows().create("w1", &options("panel.html"));
    bridge.frame(Instant::now());
    w1.wait().unwrap();
    host.take();

    bridge.unload_addon("demo").unwrap();
    bridge.frame(Instant::now());

    assert!(!demo.is_loaded());
    assert!(bridge.keybinds().is_empty());
    assert!(bridge.shortcuts().is_empty());
    assert!(bridge.windows().iter().all(|w| w.key.addon == "other"));
    assert_eq!(bridge.subscriptions().len(), 1);
    let mut destroyed = host.take();
    destroyed.sort();
    assert_eq!(destroyed, vec!["destroy demo/main", "destroy demo/w1"]);

    assert_eq!(
        demo.events().subscribe("ping", CallbackHandle(3)),
        Err(BridgeError::UnknownAddon("demo".into()))
    );
    let late = demo.windows().list();
    assert_eq!(late.try_take(), Some(Err(BridgeError::UnknownAddon("demo".into()))));
    assert_eq!(other.events().raise("ping", Value::Null).unwrap(), 1);
}

#[test]
fn every_call_on_an_unloaded_addon_is_rejected() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    demo.events().subscribe("ping", CallbackHandle(1)).unwrap();
    bridge.unload_addon("demo").unwrap();

    let gone = || BridgeError::UnknownAddon("demo".into());
    assert_eq!(demo.events().unsubscribe("ping", CallbackHandle(1)), Err(gone()));
    assert_eq!(demo.keybinds().deregister("toggle"), Err(gone()));
    assert_eq!(demo.quickaccess().remove("s"), Err(gone()));
    assert_eq!(demo.windows().close("w1"), Err(gone()));
    assert_eq!(
        demo.windows().update("main", &WindowUpdate::default()),
        Err(gone())
    );
    assert_eq!(
        demo.windows()
            .set_input_passthrough("main", PassthroughArg::Toggle(true)),
        Err(gone())
    );
}

#[test]
fn ending_a_script_session_drops_its_registrations() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    let other = load(&bridge, "other");

    demo.events().subscribe("tick", CallbackHandle(1)).unwrap();
    other.events().subscribe("tick", CallbackHandle(1)).unwrap();
    demo.keybinds().register("toggle", "CTRL+K", CallbackHandle(2)).unwrap();
    demo.quickaccess().add("s", "i", "h", "k", "t").unwrap();
    bridge.raise_event("tick", Value::Null);

    assert_eq!(demo.end_session(), 1);
    assert!(demo.is_loaded());
    assert!(bridge.keybinds().is_empty());
    assert!(bridge.shortcuts().is_empty());
    assert_eq!(bridge.subscriptions().len(), 1);
    assert_eq!(bridge.windows().len(), 2);

    // Nothing accumulates for the detached addon while no script drains it.
    for _ in 0..100 {
        bridge.raise_event("tick", Value::Null);
        bridge.push_key(KeyCode::K, Modifiers::CTRL, true);
        bridge.frame(Instant::now());
    }
    let mut engine = Recorder::default();
    assert_eq!(demo.pump(&mut engine), 0);
}

#[test]
fn failed_main_window_load_rejects_addon() {
    let (bridge, _host) = test_bridge();
    let broken = AddonManifest::from_json(
        "broken",
        r#"{"name":"B","version":"1","author":"a","description":"","entry":"missing.html"}"#,
    )
    .unwrap();
    assert!(matches!(
        bridge.load_addon(broken),
        Err(BridgeError::LoadError { .. })
    ));
    assert!(!bridge.is_loaded("broken"));
    assert!(bridge.windows().is_empty());
}

// ── Test 9: wire calls ───────────────────────────────────────────

#[test]
fn wire_calls_drive_the_surface() {
    let (bridge, host) = test_bridge();
    let demo = load(&bridge, "demo");
    host.take();

    for json in [
        r#"{"action":"events_subscribe","name":"ping","callback":11}"#,
        r#"{"action":"events_raise","name":"ping","data":[1,2]}"#,
        r#"{"action":"gamebinds_isBound","requestId":1,"bind":9}"#,
        r#"{"action":"windows_create","requestId":2,"windowId":"w1","url":"p.html","width":10,"height":10,"title":""}"#,
        r#"{"action":"alert","message":"hi"}"#,
    ] {
        demo.dispatch(parse_call(json).unwrap()).unwrap();
    }
    bridge.frame(Instant::now());

    let mut engine = Recorder::default();
    demo.pump(&mut engine);
    assert_eq!(engine.seen.len(), 3);
    assert_eq!(
        engine.seen[0],
        Delivery::Event(CallbackHandle(11), "ping".into(), json!([1, 2]))
    );
    assert_eq!(engine.seen[1], Delivery::Response(1, Ok(json!(true))));
    match &engine.seen[2] {
        Delivery::Response(2, Ok(summary)) => {
            assert_eq!(summary["id"], json!("w1"));
            assert_eq!(summary["title"], json!("w1"));
        },
        other => panic!("unexpected {other:?}"),
    }
    assert!(host.take().contains(&"alert hi".to_string()));
}

#[test]
fn malformed_async_call_is_still_answered() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");

    let result = demo.dispatch_json(
        r#"{"action":"windows_create","requestId":5,"windowId":"w1","url":"index.html","width":1.5}"#,
    );
    assert!(matches!(result, Err(BridgeError::InvalidArgument(_))));
    assert!(demo
        .dispatch_json(r#"{"action":"alert"}"#)
        .is_err());
    bridge.frame(Instant::now());

    let mut engine = Recorder::default();
    demo.pump(&mut engine);
    assert_eq!(engine.seen.len(), 1);
    assert!(matches!(
        &engine.seen[0],
        Delivery::Response(5, Err(BridgeError::InvalidArgument(_)))
    ));
    assert!(bridge.windows().iter().all(|w| w.key.id != "w1"));
}

#[test]
fn wire_sync_failures_are_returned() {
    let (bridge, _host) = test_bridge();
    let demo = load(&bridge, "demo");
    let call = parse_call(
        r#"{"action":"windows_setInputPassthrough","windowId":"main","enabled":300}"#,
    )
    .unwrap();
    assert!(matches!(
        demo.dispatch(call),
        Err(BridgeError::InvalidArgument(_))
    ));
    let call = parse_call(r#"{"action":"log","level":9,"message":"x"}"#).unwrap();
    assert!(demo.dispatch(call).is_err());
}

// ── Test 10: registry property ───────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Register(usize, usize),
    Deregister(usize),
}

const IDS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];
const CHORDS: [&str; 4] = ["CTRL+A", "CTRL+B", "ALT+A", ""];

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..IDS.len(), 0..CHORDS.len()).prop_map(|(i, c)| Op::Register(i, c)),
        (0..IDS.len()).prop_map(Op::Deregister),
    ]
}

proptest! {
    #[test]
    fn registry_matches_net_effect(ops in prop::collection::vec(op(), 0..40)) {
        let (bridge, _host) = test_bridge();
        let demo = load(&bridge, "demo");
        let mut model = BTreeSet::new();

        for op in &ops {
            match *op {
                Op::Register(i, c) => {
                    demo.keybinds()
                        .register(IDS[i], CHORDS[c], CallbackHandle(i as u64))
                        .unwrap();
                    model.insert(IDS[i].to_string());
                },
                Op::Deregister(i) => {
                    let removed = demo.keybinds().deregister(IDS[i]).unwrap();
                    prop_assert_eq!(removed, model.remove(IDS[i]));
                },
            }
        }

        let active: BTreeSet<String> =
            bridge.keybinds().into_iter().map(|k| k.local_id).collect();
        prop_assert_eq!(active, model);
        prop_assert!(jsbridge_core::invariants::validate(&bridge.snapshot()).is_ok());
    }
}
