//! Generation-counted handle tables for values crossing the C ABI.
//!
//! Callers never see a pointer into Rust memory.  A handle is an opaque
//! pointer-sized integer:
//!
//! ```text
//! | tag (4 bits) | generation (HALF - 4 bits) | slot index + 1 (HALF bits) |
//! ```
//!
//! where `HALF` is half the width of `usize`.  Freeing a slot bumps its
//! generation, so a stale copy of the handle is detected instead of
//! aliasing whatever reuses the slot.  The tag keeps a handle from one
//! table from resolving in another.
//!
//! Values are stored as `Arc<T>`: a lookup that races with `remove` keeps
//! the value alive until the in-flight call returns.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::HandleError;

const HALF: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << HALF) - 1;
const TAG_BITS: u32 = 4;
const GEN_BITS: u32 = HALF - TAG_BITS;
const GEN_MASK: usize = (1 << GEN_BITS) - 1;
const TAG_MASK: u8 = (1 << TAG_BITS) - 1;

/// Raw handle value as exchanged with foreign code.  `0` is the null handle.
pub type RawHandle = usize;

struct Slot<T> {
    generation: usize,
    value: Option<Arc<T>>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<usize>,
}

pub struct HandleTable<T> {
    tag: u8,
    slots: RwLock<Slots<T>>,
}

impl<T> HandleTable<T> {
    /// `tag` distinguishes tables; only the low four bits are used.
    pub const fn new(tag: u8) -> Self {
        Self {
            tag: tag & TAG_MASK,
            slots: RwLock::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    fn encode(&self, index: usize, generation: usize) -> RawHandle {
        let high = ((self.tag as usize) << GEN_BITS) | (generation & GEN_MASK);
        (high << HALF) | (index + 1)
    }

    fn decode(&self, raw: RawHandle) -> Result<(usize, usize), HandleError> {
        if raw == 0 {
            return Err(HandleError::Null);
        }
        let low = raw & INDEX_MASK;
        let high = raw >> HALF;
        if low == 0 || (high >> GEN_BITS) as u8 != self.tag {
            return Err(HandleError::Invalid);
        }
        Ok((low - 1, high & GEN_MASK))
    }

    /// Store `value` and return its handle.
    pub fn insert(&self, value: T) -> RawHandle {
        let mut slots = self.slots.write();
        let value = Some(Arc::new(value));
        let index = match slots.free.pop() {
            Some(index) => {
                slots.entries[index].value = value;
                index
            }
            None => {
                slots.entries.push(Slot {
                    generation: 1,
                    value,
                });
                slots.entries.len() - 1
            }
        };
        self.encode(index, slots.entries[index].generation)
    }

    pub fn get(&self, raw: RawHandle) -> Result<Arc<T>, HandleError> {
        let (index, generation) = self.decode(raw)?;
        let slots = self.slots.read();
        let slot = slots.entries.get(index).ok_or(HandleError::Invalid)?;
        match &slot.value {
            Some(value) if slot.generation & GEN_MASK == generation => Ok(Arc::clone(value)),
            _ => Err(HandleError::Stale),
        }
    }

    /// Free the slot.  A second `remove` of the same handle is `Stale`.
    pub fn remove(&self, raw: RawHandle) -> Result<Arc<T>, HandleError> {
        let (index, generation) = self.decode(raw)?;
        let mut slots = self.slots.write();
        let slot = slots.entries.get_mut(index).ok_or(HandleError::Invalid)?;
        if slot.value.is_none() || slot.generation & GEN_MASK != generation {
            return Err(HandleError::Stale);
        }
        let value = slot.value.take().ok_or(HandleError::Stale)?;
        // Generation 0 is never issued, so the bump skips it on wrap
        slot.generation = match (slot.generation + 1) & GEN_MASK {
            0 => 1,
            g => g,
        };
        slots.free.push(index);
        Ok(value)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        let slots = self.slots.read();
        slots.entries.len() - slots.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
