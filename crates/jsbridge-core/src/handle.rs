//! Opaque callback handles.
//!
//! The bridge never owns script values. A script engine keeps its closures in
//! a [`HandleArena`] and hands the bridge the resulting [`CallbackHandle`];
//! deliveries carry the handle back so the engine can look the closure up.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a script callback. Meaningless to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackHandle(pub u64);

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb:{}", self.0)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational slab mapping handles to engine-side values.
///
/// A removed slot is reused with a bumped generation, so a stale handle never
/// resolves to the value that replaced it.
#[derive(Debug)]
pub struct HandleArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleArena<T> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> CallbackHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            return encode(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        encode(index, 0)
    }

    pub fn get(&self, handle: CallbackHandle) -> Option<&T> {
        let (index, generation) = decode(handle);
        self.slots
            .get(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: CallbackHandle) -> Option<&mut T> {
        let (index, generation) = decode(handle);
        self.slots
            .get_mut(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn remove(&mut self, handle: CallbackHandle) -> Option<T> {
        let (index, generation) = decode(handle);
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        self.free.push(index);
        self.len -= 1;
        Some(value)
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

const fn encode(index: u32, generation: u32) -> CallbackHandle {
    CallbackHandle(((generation as u64) << 32) | index as u64)
}

const fn decode(handle: CallbackHandle) -> (u32, u32) {
    (handle.0 as u32, (handle.0 >> 32) as u32)
}
