// crates/quarry-core/src/handle_table.rs
// ============================================================================
// Module: Handle Table
// Description: Generation-checked slot table for engine objects.
// Purpose: Address databases, handles, and signals by id without dangling.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`HandleTable`] stores values in reusable slots. Each insertion returns an
//! [`ObjectId`] pairing the slot index with the slot's generation. Removing a
//! value bumps the generation, so ids issued earlier stop resolving even after
//! the slot is reused.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Object Id
// ============================================================================

/// Capability-checked reference into a [`HandleTable`].
///
/// # Invariants
/// - An id resolves only while its generation matches the slot's generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    /// Slot index.
    index: u32,
    /// Slot generation at insertion time.
    generation: u32,
}

impl ObjectId {
    /// Builds an id from raw parts.
    #[must_use]
    pub const fn from_parts(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
        }
    }

    /// Returns the slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the id into a single integer for flat interfaces.
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpacks an id produced by [`ObjectId::to_raw`].
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: u32::try_from(raw & 0xFFFF_FFFF).unwrap_or(u32::MAX),
            generation: u32::try_from(raw >> 32).unwrap_or(u32::MAX),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

// ============================================================================
// SECTION: Table
// ============================================================================

/// One slot of the table.
#[derive(Debug)]
struct Slot<T> {
    /// Current generation of the slot.
    generation: u32,
    /// Stored value, if occupied.
    value: Option<T>,
}

/// Slot table addressed by generation-checked ids.
#[derive(Debug)]
pub struct HandleTable<T> {
    /// Slot storage.
    slots: Vec<Slot<T>>,
    /// Indices of vacant slots, reused last-in first-out.
    free: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Stores `value` and returns its id.
    pub fn insert(&mut self, value: T) -> ObjectId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return ObjectId::from_parts(index, slot.generation);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        ObjectId::from_parts(index, 0)
    }

    /// Returns the value for `id` if the id is still live.
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Returns the value for `id` mutably if the id is still live.
    #[must_use]
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Removes and returns the value for `id`, invalidating the id.
    pub fn remove(&mut self, id: ObjectId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Returns true when `id` resolves.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Returns the number of live values.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true when no value is stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over live ids and values.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let value = slot.value.as_ref()?;
            let index = u32::try_from(index).ok()?;
            Some((ObjectId::from_parts(index, slot.generation), value))
        })
    }
}
