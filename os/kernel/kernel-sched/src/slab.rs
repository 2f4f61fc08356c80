//! Fixed-capacity slab with generation-checked handles.
//!
//! A slot's generation is bumped whenever its value is removed, so a handle
//! kept past removal no longer resolves, even after the slot is reused.

use alloc::vec::Vec;

/// Reference to a slab entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slab full ({capacity} entries)")]
pub struct SlabFull {
    pub capacity: usize,
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    capacity: usize,
}

impl<T> Slab<T> {
    /// A slab that never holds more than `capacity` entries.
    ///
    /// Slot storage is reserved up front so inserts never allocate.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
            capacity: capacity.min(u32::MAX as usize),
        }
    }

    /// # Errors
    /// [`SlabFull`] when all `capacity` slots are occupied.
    #[allow(clippy::cast_possible_truncation)]
    pub fn insert(&mut self, value: T) -> Result<Handle, SlabFull> {
        if let Some(index) = self.free_head {
            if let Some(&Slot::Vacant {
                generation,
                next_free,
            }) = self.slots.get(index as usize)
            {
                self.free_head = next_free;
                self.slots[index as usize] = Slot::Occupied { generation, value };
                self.len += 1;
                return Ok(Handle { index, generation });
            }
            // A broken free list is dropped; live entries stay where they are.
            self.free_head = None;
        }

        if self.slots.len() >= self.capacity {
            return Err(SlabFull {
                capacity: self.capacity,
            });
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        self.len += 1;
        Ok(Handle {
            index,
            generation: 0,
        })
    }

    /// Removes and returns the entry `handle` refers to.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let Slot::Occupied { value, .. } = core::mem::replace(slot, vacant) else {
            return None;
        };
        self.free_head = Some(handle.index);
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_until_full() {
        let mut slab = Slab::with_capacity(2);
        let a = slab.insert('a').unwrap();
        let b = slab.insert('b').unwrap();
        assert_eq!(slab.insert('c'), Err(SlabFull { capacity: 2 }));
        assert_eq!(slab.get(a), Some(&'a'));
        assert_eq!(slab.get(b), Some(&'b'));
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn stale_handle_does_not_resolve_after_reuse() {
        let mut slab = Slab::with_capacity(1);
        let old = slab.insert(1).unwrap();
        assert_eq!(slab.remove(old), Some(1));
        assert!(slab.is_empty());

        let new = slab.insert(2).unwrap();
        assert_ne!(old, new);
        assert_eq!(slab.get(old), None);
        assert_eq!(slab.remove(old), None);
        assert_eq!(slab.get(new), Some(&2));
    }

    #[test]
    fn broken_free_list_never_overwrites_a_live_entry() {
        let mut slab = Slab::with_capacity(2);
        let a = slab.insert('a').unwrap();
        slab.free_head = Some(a.index);

        let b = slab.insert('b').unwrap();
        assert_ne!(a.index, b.index);
        assert_eq!(slab.get(a), Some(&'a'));
        assert_eq!(slab.insert('c'), Err(SlabFull { capacity: 2 }));
        assert_eq!(slab.get(a), Some(&'a'));
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn freed_slots_are_reused_lifo() {
        let mut slab = Slab::with_capacity(3);
        let handles: Vec<_> = (0..3).map(|v| slab.insert(v).unwrap()).collect();
        slab.remove(handles[0]);
        slab.remove(handles[2]);
        let h = slab.insert(9).unwrap();
        assert_eq!(h.index, handles[2].index);
        if let Some(v) = slab.get_mut(h) {
            *v += 1;
        }
        assert_eq!(slab.get(h), Some(&10));
    }
}
