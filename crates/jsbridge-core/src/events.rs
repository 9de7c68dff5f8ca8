//! Event bus.
//!
//! Process-wide publish/subscribe keyed by event name. Deliveries go through
//! each subscriber's script queue; the subscriber list is snapshotted at raise
//! time, so subscriptions added while an event is in flight miss it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{BridgeError, Result};
use crate::handle::CallbackHandle;
use crate::script::{ScriptRoutes, ScriptTask};

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub event_name: String,
    pub callback: CallbackHandle,
    pub addon: String,
}

#[derive(Debug, Default)]
struct BusTable {
    by_event: HashMap<String, Vec<Subscription>>,
    next_id: u64,
}

impl BusTable {
    fn count_for(&self, addon: &str) -> usize {
        self.by_event
            .values()
            .flatten()
            .filter(|s| s.addon == addon)
            .count()
    }

    fn retain(&mut self, mut keep: impl FnMut(&Subscription) -> bool) -> usize {
        let mut removed = 0;
        self.by_event.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| keep(s));
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }
}

pub struct EventBus {
    table: Mutex<BusTable>,
    routes: Arc<ScriptRoutes>,
    max_per_addon: usize,
}

impl EventBus {
    pub fn new(routes: Arc<ScriptRoutes>, max_per_addon: usize) -> Self {
        Self {
            table: Mutex::new(BusTable::default()),
            routes,
            max_per_addon,
        }
    }

    pub fn subscribe(
        &self,
        addon: &str,
        event_name: &str,
        callback: CallbackHandle,
    ) -> Result<SubscriptionId> {
        if event_name.is_empty() {
            return Err(BridgeError::invalid("event name must not be empty"));
        }

        let mut table = self.table.lock();
        if table.count_for(addon) >= self.max_per_addon {
            return Err(BridgeError::invalid(format!(
                "addon '{addon}' exceeded {} event subscriptions",
                self.max_per_addon
            )));
        }

        table.next_id += 1;
        let id = SubscriptionId(table.next_id);
        table
            .by_event
            .entry(event_name.to_string())
            .or_default()
            .push(Subscription {
                id,
                event_name: event_name.to_string(),
                callback,
                addon: addon.to_string(),
            });

        debug!(addon, event = event_name, %id, "subscribed");
        Ok(id)
    }

    /// Remove subscription `id` if `addon` owns it.
    pub fn unsubscribe(&self, addon: &str, id: SubscriptionId) -> bool {
        self.table
            .lock()
            .retain(|s| !(s.id == id && s.addon == addon))
            > 0
    }

    /// Remove the subscriptions `addon` made for `event_name` with `callback`.
    pub fn unsubscribe_callback(
        &self,
        addon: &str,
        event_name: &str,
        callback: CallbackHandle,
    ) -> bool {
        let removed = self.table.lock().retain(|s| {
            !(s.addon == addon && s.event_name == event_name && s.callback == callback)
        });
        removed > 0
    }

    pub fn unsubscribe_all(&self, addon: &str) -> usize {
        let removed = self.table.lock().retain(|s| s.addon != addon);
        if removed > 0 {
            debug!(addon, removed, "dropped event subscriptions");
        }
        removed
    }

    /// Deliver `payload` to every current subscriber of `event_name`.
    /// Returns the number of deliveries queued.
    pub fn raise(&self, event_name: &str, payload: Value) -> usize {
        let snapshot: Vec<(String, CallbackHandle)> = {
            let table = self.table.lock();
            match table.by_event.get(event_name) {
                Some(subs) => subs.iter().map(|s| (s.addon.clone(), s.callback)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (addon, callback) in snapshot {
            let task = ScriptTask::Event {
                callback,
                name: event_name.to_string(),
                payload: payload.clone(),
            };
            if self.routes.post(&addon, task) {
                delivered += 1;
            }
        }
        trace!(event = event_name, delivered, "raised");
        delivered
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        let table = self.table.lock();
        let mut all: Vec<Subscription> = table.by_event.values().flatten().cloned().collect();
        all.sort_by_key(|s| s.id);
        all
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("max_per_addon", &self.max_per_addon)
            .finish_non_exhaustive()
    }
}
