//! Script context plumbing.
//!
//! Each loaded addon owns one single-consumer [`ScriptQueue`]. Native code
//! never calls into the script engine directly; it posts a [`ScriptTask`] and
//! the script context runs it the next time it drains its queue.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::handle::CallbackHandle;

/// Correlates an async script call with its completion.
pub type RequestId = u64;

/// Work for the script context.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptTask {
    Event {
        callback: CallbackHandle,
        name: String,
        payload: Value,
    },
    Keybind {
        callback: CallbackHandle,
        /// Identifier as the addon registered it, without namespace.
        identifier: String,
        is_release: bool,
    },
    Response {
        request_id: RequestId,
        result: Result<Value, BridgeError>,
    },
}

/// A script handler failed. Reported, never propagated.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ScriptError(pub String);

/// The embedded engine, as seen from the bridge.
pub trait ScriptEngine {
    fn call_event(
        &mut self,
        callback: CallbackHandle,
        name: &str,
        payload: &Value,
    ) -> Result<(), ScriptError>;

    fn call_keybind(
        &mut self,
        callback: CallbackHandle,
        identifier: &str,
        is_release: bool,
    ) -> Result<(), ScriptError>;

    fn complete(
        &mut self,
        request_id: RequestId,
        result: Result<Value, BridgeError>,
    ) -> Result<(), ScriptError>;
}

/// Posting side of an addon's script queue.
#[derive(Debug, Clone)]
pub struct ScriptSender {
    addon: String,
    tx: Sender<ScriptTask>,
}

impl ScriptSender {
    /// Returns false once the addon's queue is gone.
    pub fn post(&self, task: ScriptTask) -> bool {
        if self.tx.send(task).is_err() {
            debug!(addon = %self.addon, "script queue closed, task dropped");
            return false;
        }
        true
    }

    pub fn addon(&self) -> &str {
        &self.addon
    }
}

/// Consuming side of an addon's script queue.
#[derive(Debug)]
pub struct ScriptQueue {
    addon: String,
    rx: Receiver<ScriptTask>,
}

pub fn script_queue(addon: &str) -> (ScriptSender, ScriptQueue) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        ScriptSender {
            addon: addon.to_string(),
            tx,
        },
        ScriptQueue {
            addon: addon.to_string(),
            rx,
        },
    )
}

impl ScriptQueue {
    /// Run every queued task against `engine`. Returns the number run.
    pub fn drain(&self, engine: &mut dyn ScriptEngine) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            self.run(engine, task);
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for the first task, then drain.
    pub fn drain_timeout(&self, engine: &mut dyn ScriptEngine, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                self.run(engine, task);
                1 + self.drain(engine)
            },
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Throw away every queued task without running it.
    pub fn discard(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    fn run(&self, engine: &mut dyn ScriptEngine, task: ScriptTask) {
        let outcome = match task {
            ScriptTask::Event {
                callback,
                name,
                payload,
            } => engine
                .call_event(callback, &name, &payload)
                .map_err(|e| (format!("event '{name}'"), e)),
            ScriptTask::Keybind {
                callback,
                identifier,
                is_release,
            } => engine
                .call_keybind(callback, &identifier, is_release)
                .map_err(|e| (format!("keybind '{identifier}'"), e)),
            ScriptTask::Response { request_id, result } => engine
                .complete(request_id, result)
                .map_err(|e| (format!("request {request_id}"), e)),
        };

        if let Err((what, err)) = outcome {
            warn!(addon = %self.addon, "script handler for {} failed: {}", what, err);
        }
    }
}

/// Addon id to script queue lookup, shared by every component that delivers
/// work to scripts.
#[derive(Debug, Default)]
pub struct ScriptRoutes {
    senders: Mutex<HashMap<String, ScriptSender>>,
}

impl ScriptRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sender: ScriptSender) {
        self.senders
            .lock()
            .insert(sender.addon().to_string(), sender);
    }

    pub fn remove(&self, addon: &str) -> Option<ScriptSender> {
        self.senders.lock().remove(addon)
    }

    pub fn sender(&self, addon: &str) -> Option<ScriptSender> {
        self.senders.lock().get(addon).cloned()
    }

    /// Post to `addon`, if it is still loaded.
    pub fn post(&self, addon: &str, task: ScriptTask) -> bool {
        match self.sender(addon) {
            Some(sender) => sender.post(task),
            None => {
                debug!(addon, "no script route, task dropped");
                false
            },
        }
    }
}
