//! Wire protocol
//!
//! Lets a script runtime in another process drive an addon surface over a
//! Unix socket. Every frame is `"nexus"` (5 bytes) + payload length (u32 LE)
//! + message kind (u32 LE) + JSON payload.
//!
//! A client opens with `Hello {"addon": "<id>"}` and from then on owns that
//! addon's surface: its `Call` frames run against the surface and everything
//! queued for the addon's script context comes back as `Dispatch` frames.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::TryRecvError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use jsbridge_core::{
    AddonSurface, BridgeError, CallbackHandle, DispatchMessage, RequestId, ScriptEngine,
    ScriptError,
};

/// Frame header magic
const WIRE_MAGIC: &[u8; 5] = b"nexus";

/// Upper bound on a single payload; larger frames end the connection.
const MAX_PAYLOAD: usize = 1 << 20;

/// How long the dispatch thread waits for script work before rechecking
/// whether the client is still there.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageKind {
    /// Client to server: one `ScriptCall`
    Call = 1,
    /// Server to client: one `DispatchMessage`
    Dispatch = 2,
    /// Client to server: session opener
    Hello = 3,
}

impl MessageKind {
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Call),
            2 => Some(Self::Dispatch),
            3 => Some(Self::Hello),
            _ => None,
        }
    }
}

/// A framed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub kind: MessageKind,
    pub payload: String,
}

impl WireMessage {
    pub fn new(kind: MessageKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn json(kind: MessageKind, value: &impl Serialize) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_string(value)?))
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = self.payload.as_bytes();
        let mut bytes = Vec::with_capacity(WIRE_MAGIC.len() + 8 + payload.len());
        bytes.extend_from_slice(WIRE_MAGIC);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.kind as u32).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Parse message from a stream
    pub fn from_reader(reader: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 5];
        reader
            .read_exact(&mut magic)
            .context("Failed to read frame magic")?;
        if &magic != WIRE_MAGIC {
            anyhow::bail!("Invalid frame magic: {:?}", magic);
        }

        let mut word = [0u8; 4];
        reader
            .read_exact(&mut word)
            .context("Failed to read payload length")?;
        let length = u32::from_le_bytes(word) as usize;
        if length > MAX_PAYLOAD {
            anyhow::bail!("Payload of {length} bytes exceeds the {MAX_PAYLOAD} byte limit");
        }

        reader
            .read_exact(&mut word)
            .context("Failed to read message kind")?;
        let raw_kind = u32::from_le_bytes(word);
        let kind = MessageKind::from_u32(raw_kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown message kind: {}", raw_kind))?;

        let mut payload = vec![0u8; length];
        reader
            .read_exact(&mut payload)
            .context("Failed to read payload")?;
        let payload = String::from_utf8(payload).context("Invalid UTF-8 in payload")?;

        Ok(Self { kind, payload })
    }
}

/// Session opener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub addon: String,
}

/// Loaded addon surfaces not currently attached to a client.
pub type SurfacePool = Arc<Mutex<HashMap<String, Arc<AddonSurface>>>>;

/// Wire protocol server
pub struct IpcServer {
    socket_path: PathBuf,
    pool: SurfacePool,
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>, pool: SurfacePool) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            pool,
        }
    }

    /// Bind the socket and accept clients on a background thread.
    pub fn start(self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove stale socket: {:?}", self.socket_path)
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind socket: {:?}", self.socket_path))?;
        info!("Listening for script runtimes on {:?}", self.socket_path);

        let pool = self.pool;
        thread::Builder::new()
            .name("wire-accept".into())
            .spawn(move || {
                for stream in listener.incoming() {
                    match stream {
                        Ok(stream) => {
                            let pool = Arc::clone(&pool);
                            thread::spawn(move || {
                                if let Err(e) = handle_client(stream, &pool) {
                                    debug!("Client disconnected: {:#}", e);
                                }
                            });
                        },
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
            })
            .context("Failed to spawn accept thread")?;

        Ok(())
    }
}

/// Returns a claimed surface to the pool when the session ends, unless the
/// addon was unloaded meanwhile. The departed runtime's callbacks go with it,
/// so nothing queues up for the addon until the next runtime attaches.
struct Claim<'a> {
    pool: &'a SurfacePool,
    surface: Arc<AddonSurface>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.surface.is_loaded() {
            self.surface.end_session();
            self.pool
                .lock()
                .insert(self.surface.id().to_string(), Arc::clone(&self.surface));
        }
    }
}

fn handle_client(mut stream: UnixStream, pool: &SurfacePool) -> Result<()> {
    let hello = WireMessage::from_reader(&mut stream)?;
    if hello.kind != MessageKind::Hello {
        anyhow::bail!("Expected Hello, got {:?}", hello.kind);
    }
    let hello: Hello = serde_json::from_str(&hello.payload).context("Malformed Hello")?;

    let surface = pool
        .lock()
        .remove(&hello.addon)
        .with_context(|| format!("Addon '{}' is not loaded or already attached", hello.addon))?;
    let claim = Claim { pool, surface };
    info!(addon = %hello.addon, "script runtime attached");

    // Dropping `attached` tells the dispatch thread to stop.
    let (attached, detached) = crossbeam_channel::bounded::<()>(0);
    let mut engine = WireEngine {
        stream: stream.try_clone().context("Failed to clone client stream")?,
        broken: false,
    };

    thread::scope(|s| {
        let surface = &claim.surface;
        s.spawn(move || {
            while matches!(detached.try_recv(), Err(TryRecvError::Empty)) && !engine.broken {
                surface.pump_timeout(&mut engine, PUMP_INTERVAL);
            }
        });

        let result = read_calls(&mut stream, surface);
        drop(attached);
        result
    })
}

fn read_calls(stream: &mut UnixStream, surface: &AddonSurface) -> Result<()> {
    loop {
        let message = WireMessage::from_reader(stream)?;
        if message.kind != MessageKind::Call {
            warn!(addon = surface.id(), "Ignoring {:?} frame from client", message.kind);
            continue;
        }

        trace!(addon = surface.id(), payload = %message.payload, "call");
        if let Err(e) = surface.dispatch_json(&message.payload) {
            warn!(addon = surface.id(), "call failed: {}", e);
        }
    }
}

/// Script engine that forwards every task to the client as a `Dispatch` frame.
struct WireEngine {
    stream: UnixStream,
    broken: bool,
}

impl WireEngine {
    fn send(&mut self, message: &DispatchMessage) -> Result<(), ScriptError> {
        let frame = WireMessage::json(MessageKind::Dispatch, message)
            .map_err(|e| ScriptError(e.to_string()))?;
        self.stream.write_all(&frame.to_bytes()).map_err(|e| {
            self.broken = true;
            ScriptError(format!("client write failed: {e}"))
        })
    }
}

impl ScriptEngine for WireEngine {
    fn call_event(
        &mut self,
        callback: CallbackHandle,
        name: &str,
        payload: &Value,
    ) -> Result<(), ScriptError> {
        self.send(&DispatchMessage::Event {
            callback,
            name: name.to_string(),
            data: payload.clone(),
        })
    }

    fn call_keybind(
        &mut self,
        callback: CallbackHandle,
        identifier: &str,
        is_release: bool,
    ) -> Result<(), ScriptError> {
        self.send(&DispatchMessage::Keybind {
            callback,
            id: identifier.to_string(),
            is_release,
        })
    }

    fn complete(
        &mut self,
        request_id: RequestId,
        result: Result<Value, BridgeError>,
    ) -> Result<(), ScriptError> {
        self.send(&DispatchMessage::response(request_id, result))
    }
}
