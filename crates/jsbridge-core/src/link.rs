//! Link bridge.
//!
//! The host publishes whole fixed-layout blobs once per frame through a
//! [`LinkWriter`]. Readers take the current blob by reference count under a
//! read lock, so a snapshot is always one complete publication. An
//! unpublished region reads as zeroes at version 0.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Size of the shared `MumbleLink` block.
pub const MUMBLE_LINK_SIZE: usize = 5460;
/// Size of the host-native link block.
pub const NEXUS_LINK_SIZE: usize = 16;

// MumbleLink offsets.
const ML_UI_VERSION: usize = 0;
const ML_UI_TICK: usize = 4;
const ML_AVATAR_POSITION: usize = 8;
const ML_AVATAR_FRONT: usize = 20;
const ML_AVATAR_TOP: usize = 32;
const ML_NAME: usize = 44;
const ML_CAMERA_POSITION: usize = 556;
const ML_CAMERA_FRONT: usize = 568;
const ML_CAMERA_TOP: usize = 580;
const ML_IDENTITY: usize = 592;
const ML_CONTEXT_LEN: usize = 1104;
const ML_CONTEXT: usize = 1108;
const ML_DESCRIPTION: usize = 1364;

const NAME_UNITS: usize = 256;
const IDENTITY_UNITS: usize = 256;
const DESCRIPTION_UNITS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkRegionId {
    Mumble,
    Nexus,
}

impl LinkRegionId {
    pub const fn layout_size(self) -> usize {
        match self {
            Self::Mumble => MUMBLE_LINK_SIZE,
            Self::Nexus => NEXUS_LINK_SIZE,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mumble => "mumble",
            Self::Nexus => "nexus",
        }
    }
}

impl fmt::Display for LinkRegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Publication {
    version: u64,
    bytes: Arc<[u8]>,
}

/// One shared-memory region.
#[derive(Debug)]
pub struct LinkRegion {
    id: LinkRegionId,
    current: RwLock<Publication>,
}

impl LinkRegion {
    fn new(id: LinkRegionId) -> Self {
        Self {
            id,
            current: RwLock::new(Publication {
                version: 0,
                bytes: vec![0u8; id.layout_size()].into(),
            }),
        }
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        let current = self.current.read();
        LinkSnapshot {
            region: self.id,
            version: current.version,
            bytes: Arc::clone(&current.bytes),
        }
    }
}

/// Host-side publishing handle for one region.
#[derive(Debug, Clone)]
pub struct LinkWriter {
    region: Arc<LinkRegion>,
}

impl LinkWriter {
    /// Replace the region's contents and return the new version. Short blobs
    /// are zero-padded to the layout size; long ones are truncated.
    pub fn publish(&self, bytes: &[u8]) -> u64 {
        let size = self.region.id.layout_size();
        let mut buf = vec![0; size];
        let n = bytes.len().min(size);
        buf[..n].copy_from_slice(&bytes[..n]);
        let buf: Arc<[u8]> = buf.into();

        let mut current = self.region.current.write();
        current.version += 1;
        current.bytes = buf;
        trace!(region = %self.region.id, version = current.version, "link published");
        current.version
    }

    pub fn region(&self) -> LinkRegionId {
        self.region.id
    }
}

/// A consistent copy of one publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub region: LinkRegionId,
    pub version: u64,
    pub bytes: Arc<[u8]>,
}

impl LinkSnapshot {
    /// Decode into the region's structured form.
    pub fn decode(&self) -> Value {
        let decoded = match self.region {
            LinkRegionId::Mumble => serde_json::to_value(MumbleLink::decode(&self.bytes)),
            LinkRegionId::Nexus => serde_json::to_value(NexusLink::decode(&self.bytes)),
        };
        // Plain structs of numbers and strings always serialize.
        decoded.unwrap_or(Value::Null)
    }
}

/// Both regions.
#[derive(Debug)]
pub struct LinkBridge {
    mumble: Arc<LinkRegion>,
    nexus: Arc<LinkRegion>,
}

impl Default for LinkBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkBridge {
    pub fn new() -> Self {
        Self {
            mumble: Arc::new(LinkRegion::new(LinkRegionId::Mumble)),
            nexus: Arc::new(LinkRegion::new(LinkRegionId::Nexus)),
        }
    }

    fn region(&self, id: LinkRegionId) -> &Arc<LinkRegion> {
        match id {
            LinkRegionId::Mumble => &self.mumble,
            LinkRegionId::Nexus => &self.nexus,
        }
    }

    pub fn writer(&self, id: LinkRegionId) -> LinkWriter {
        LinkWriter {
            region: Arc::clone(self.region(id)),
        }
    }

    pub fn snapshot(&self, id: LinkRegionId) -> LinkSnapshot {
        self.region(id).snapshot()
    }
}

/// Little-endian field reader over a fixed layout. Out-of-range reads
/// yield zeroes.
struct LayoutReader<'a> {
    bytes: &'a [u8],
}

impl<'a> LayoutReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0; N];
        if let Some(src) = self.bytes.get(offset..offset + N) {
            out.copy_from_slice(src);
        }
        out
    }

    fn u8(&self, offset: usize) -> u8 {
        self.bytes.get(offset).copied().unwrap_or(0)
    }

    fn u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.array(offset))
    }

    fn u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.array(offset))
    }

    fn f32(&self, offset: usize) -> f32 {
        f32::from_le_bytes(self.array(offset))
    }

    fn bool(&self, offset: usize) -> bool {
        self.u8(offset) != 0
    }

    fn vec3(&self, offset: usize) -> [f32; 3] {
        [self.f32(offset), self.f32(offset + 4), self.f32(offset + 8)]
    }

    /// NUL-terminated UTF-16 of at most `units` code units.
    fn utf16(&self, offset: usize, units: usize) -> String {
        let chars: Vec<u16> = (0..units)
            .map(|i| self.u16(offset + i * 2))
            .take_while(|&c| c != 0)
            .collect();
        String::from_utf16_lossy(&chars)
    }

    fn slice(&self, offset: usize, len: usize) -> LayoutReader<'a> {
        let end = (offset + len).min(self.bytes.len());
        LayoutReader::new(self.bytes.get(offset..end).unwrap_or(&[]))
    }
}

/// Game-specific block inside `MumbleLink::context`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MumbleContext {
    pub map_id: u32,
    pub map_type: u32,
    pub shard_id: u32,
    pub instance: u32,
    pub build_id: u32,
    pub ui_state: u32,
    pub compass_width: u16,
    pub compass_height: u16,
    pub compass_rotation: f32,
    pub player_x: f32,
    pub player_y: f32,
    pub map_center_x: f32,
    pub map_center_y: f32,
    pub map_scale: f32,
    pub process_id: u32,
    pub mount_index: u8,
}

impl MumbleContext {
    fn decode(r: &LayoutReader<'_>) -> Self {
        Self {
            map_id: r.u32(28),
            map_type: r.u32(32),
            shard_id: r.u32(36),
            instance: r.u32(40),
            build_id: r.u32(44),
            ui_state: r.u32(48),
            compass_width: r.u16(52),
            compass_height: r.u16(54),
            compass_rotation: r.f32(56),
            player_x: r.f32(60),
            player_y: r.f32(64),
            map_center_x: r.f32(68),
            map_center_y: r.f32(72),
            map_scale: r.f32(76),
            process_id: r.u32(80),
            mount_index: r.u8(84),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MumbleLink {
    pub ui_version: u32,
    pub ui_tick: u32,
    pub avatar_position: [f32; 3],
    pub avatar_front: [f32; 3],
    pub avatar_top: [f32; 3],
    pub name: String,
    pub camera_position: [f32; 3],
    pub camera_front: [f32; 3],
    pub camera_top: [f32; 3],
    pub identity: String,
    pub context_len: u32,
    pub context: MumbleContext,
    pub description: String,
}

impl MumbleLink {
    pub fn decode(bytes: &[u8]) -> Self {
        let r = LayoutReader::new(bytes);
        Self {
            ui_version: r.u32(ML_UI_VERSION),
            ui_tick: r.u32(ML_UI_TICK),
            avatar_position: r.vec3(ML_AVATAR_POSITION),
            avatar_front: r.vec3(ML_AVATAR_FRONT),
            avatar_top: r.vec3(ML_AVATAR_TOP),
            name: r.utf16(ML_NAME, NAME_UNITS),
            camera_position: r.vec3(ML_CAMERA_POSITION),
            camera_front: r.vec3(ML_CAMERA_FRONT),
            camera_top: r.vec3(ML_CAMERA_TOP),
            identity: r.utf16(ML_IDENTITY, IDENTITY_UNITS),
            context_len: r.u32(ML_CONTEXT_LEN),
            context: MumbleContext::decode(&r.slice(ML_CONTEXT, 256)),
            description: r.utf16(ML_DESCRIPTION, DESCRIPTION_UNITS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NexusLink {
    pub width: u32,
    pub height: u32,
    pub scaling: f32,
    pub is_moving: bool,
    pub is_camera_moving: bool,
    pub is_gameplay: bool,
}

impl NexusLink {
    pub fn decode(bytes: &[u8]) -> Self {
        let r = LayoutReader::new(bytes);
        Self {
            width: r.u32(0),
            height: r.u32(4),
            scaling: r.f32(8),
            is_moving: r.bool(12),
            is_camera_moving: r.bool(13),
            is_gameplay: r.bool(14),
        }
    }

    /// Host-side encoding, for hosts that synthesize this region.
    pub fn to_bytes(&self) -> [u8; NEXUS_LINK_SIZE] {
        let mut out = [0; NEXUS_LINK_SIZE];
        out[0..4].copy_from_slice(&self.width.to_le_bytes());
        out[4..8].copy_from_slice(&self.height.to_le_bytes());
        out[8..12].copy_from_slice(&self.scaling.to_le_bytes());
        out[12] = u8::from(self.is_moving);
        out[13] = u8::from(self.is_camera_moving);
        out[14] = u8::from(self.is_gameplay);
        out
    }
}
